use std::collections::BTreeMap;

use heat_atlas::{ClusterIcon, SentimentCategory, SizeClass};
use ratatui::layout::Rect as TuiRect;
use ratatui::style::Color;
use ratatui::symbols::Marker;
use ratatui::text::Line as TextLine;
use ratatui::widgets::canvas::{Canvas, Circle, Rectangle};
use ratatui::widgets::{Block, Borders};
use ratatui::Frame;

use crate::state::MarkerPoint;

/// Grid cells per view width used to group markers into clusters.
const CLUSTER_CELLS: f64 = 8.0;

pub fn category_color(category: SentimentCategory) -> Color {
    match category {
        SentimentCategory::Small => Color::Blue,
        SentimentCategory::Medium => Color::Yellow,
        SentimentCategory::Large => Color::LightRed,
        SentimentCategory::Xl => Color::Red,
    }
}

/// Cluster circle radius as a share of the cell size.
fn radius_share(size: SizeClass) -> f64 {
    match size {
        SizeClass::Base => 0.15,
        SizeClass::Medium => 0.22,
        SizeClass::Large => 0.29,
        SizeClass::Xl => 0.36,
    }
}

pub struct Cluster {
    pub x: f64,
    pub y: f64,
    pub icon: ClusterIcon,
}

/// Marker clusters for the current viewport.
pub struct MapView {
    clusters: Vec<Cluster>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
    cell: f64,
}

impl MapView {
    /// Groups the markers inside `bbox` by grid cell; each group is drawn at its centroid.
    pub fn new(points: &[MarkerPoint], bbox: [f64; 4]) -> Self {
        let [min_lon, min_lat, max_lon, max_lat] = bbox;
        let cell = ((max_lon - min_lon) / CLUSTER_CELLS).max(f64::EPSILON);

        let mut groups: BTreeMap<(i64, i64), Vec<MarkerPoint>> = BTreeMap::new();
        for p in points {
            if p.lon < min_lon || p.lon > max_lon || p.lat < min_lat || p.lat > max_lat {
                continue;
            }
            let key = (((p.lon - min_lon) / cell).floor() as i64, ((p.lat - min_lat) / cell).floor() as i64);
            groups.entry(key).or_default().push(*p);
        }

        let clusters = groups
            .into_values()
            .map(|members| {
                let n = members.len() as f64;
                let x = members.iter().map(|p| p.lon).sum::<f64>() / n;
                let y = members.iter().map(|p| p.lat).sum::<f64>() / n;
                let icon = ClusterIcon::from_markers(members.iter().map(|p| (p.mentions, p.sentiment)));
                Cluster { x, y, icon }
            })
            .collect();

        Self { clusters, x_bounds: [min_lon, max_lon], y_bounds: [min_lat, max_lat], cell }
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn render(&self, f: &mut Frame, area: TuiRect, title: &str) {
        let canvas = Canvas::default()
            .block(Block::default().title(title).borders(Borders::ALL))
            .marker(Marker::Braille)
            .x_bounds(self.x_bounds)
            .y_bounds(self.y_bounds)
            .paint(|ctx| {
                // 1) Viewport frame
                ctx.draw(&Rectangle {
                    x: self.x_bounds[0],
                    y: self.y_bounds[0],
                    width: self.x_bounds[1] - self.x_bounds[0],
                    height: self.y_bounds[1] - self.y_bounds[0],
                    color: Color::DarkGray,
                });
                ctx.layer();

                // 2) Clusters, coloured by max sentiment and labelled with mentions
                for c in &self.clusters {
                    let color = category_color(c.icon.category);
                    ctx.draw(&Circle {
                        x: c.x,
                        y: c.y,
                        radius: self.cell * radius_share(c.icon.size.size_class),
                        color,
                    });
                    ctx.print(c.x, c.y, TextLine::styled(c.icon.label.clone(), color));
                }
            });
        f.render_widget(canvas, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lon: f64, lat: f64, mentions: u64, sentiment: f64) -> MarkerPoint {
        MarkerPoint { lon, lat, mentions, sentiment }
    }

    #[test]
    fn nearby_markers_share_a_cluster() {
        let points = [
            point(0.1, 0.1, 600, 0.2),
            point(0.2, 0.2, 700, 0.9),
            point(7.5, 7.5, 10, 0.1),
            point(20.0, 20.0, 10, 0.1),
        ];
        let view = MapView::new(&points, [0.0, 0.0, 8.0, 8.0]);

        assert_eq!(view.cluster_count(), 2);
        let big = view.clusters.iter().find(|c| c.icon.total_mentions == 1_300).unwrap();
        assert_eq!(big.icon.category, SentimentCategory::Xl);
        assert_eq!(big.icon.size.size_class, SizeClass::Medium);
    }
}
