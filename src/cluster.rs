use serde::Serialize;

pub const DEFAULT_CLUSTER_SIZE: u32 = 40;

/// Sentiment bucket used for cluster colouring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentCategory {
    Small,
    Medium,
    Large,
    Xl,
}

impl SentimentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentCategory::Small => "small",
            SentimentCategory::Medium => "medium",
            SentimentCategory::Large => "large",
            SentimentCategory::Xl => "xl",
        }
    }
}

/// Size class of a cluster by total mentions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Base,
    Medium,
    Large,
    Xl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterSize {
    pub size_px: u32,
    pub size_class: SizeClass,
}

/// `level` is sentiment scaled to 0..=100.
pub fn sentiment_category(level: f64) -> SentimentCategory {
    if (0.0..30.0).contains(&level) {
        SentimentCategory::Small
    } else if (30.0..55.0).contains(&level) {
        SentimentCategory::Medium
    } else if (55.0..80.0).contains(&level) {
        SentimentCategory::Large
    } else {
        SentimentCategory::Xl
    }
}

/// Exact boundaries 10 000 and 50 000 fall back to the base size.
pub fn classify(total_mentions: u64) -> ClusterSize {
    let (size_px, size_class) = if total_mentions > 1_000 && total_mentions < 10_000 {
        (50, SizeClass::Medium)
    } else if total_mentions > 10_000 && total_mentions < 50_000 {
        (60, SizeClass::Large)
    } else if total_mentions > 50_000 {
        (70, SizeClass::Xl)
    } else {
        (DEFAULT_CLUSTER_SIZE, SizeClass::Base)
    };
    ClusterSize { size_px, size_class }
}

/// Abbreviated label: `+1.2k`, `+3.4m` above 1000, plain integer otherwise.
pub fn format_mentions(mentions: u64) -> String {
    if mentions <= 1_000 {
        return mentions.to_string();
    }
    const UNITS: [(f64, &str); 4] = [(1e12, "t"), (1e9, "b"), (1e6, "m"), (1e3, "k")];
    let value = mentions as f64;
    for (scale, suffix) in UNITS {
        if value >= scale {
            return format!("+{:.1}{}", value / scale, suffix);
        }
    }
    mentions.to_string()
}

/// Icon summary for a group of tile markers.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterIcon {
    pub total_mentions: u64,
    pub max_sentiment: f64,
    pub category: SentimentCategory,
    pub size: ClusterSize,
    pub label: String,
}

impl ClusterIcon {
    /// Aggregates `(mentions, sentiment)` of the child markers.
    pub fn from_markers<I>(markers: I) -> Self
    where
        I: IntoIterator<Item = (u64, f64)>,
    {
        let (total_mentions, max_sentiment) = markers
            .into_iter()
            .fold((0u64, 0.0f64), |(total, max), (mentions, sentiment)| {
                let sentiment = if sentiment.is_finite() { sentiment } else { 0.0 };
                (total + mentions, max.max(sentiment))
            });

        Self {
            total_mentions,
            max_sentiment,
            category: sentiment_category(max_sentiment * 100.0),
            size: classify(total_mentions),
            label: format_mentions(total_mentions),
        }
    }

    pub fn class_name(&self) -> String {
        let mut class = format!("marker-cluster marker-cluster-{}", self.category.as_str());
        match self.size.size_class {
            SizeClass::Base => {}
            SizeClass::Medium => class.push_str(" cluster-size-medium"),
            SizeClass::Large => class.push_str(" cluster-size-large"),
            SizeClass::Xl => class.push_str(" cluster-size-xl"),
        }
        class
    }
}
