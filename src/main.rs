mod map_draw;
mod state;
mod ui;

use std::fs::File;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use heat_atlas::{FileFetcher, HeatmapConfig, SyntheticFetcher, data::TileDataDir};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::info;
use tracing_subscriber::EnvFilter;

use state::{AnyFetcher, AppState};

#[derive(Parser, Debug)]
#[command(name = "heat-atlas", about = "Terminal sentiment heat map over geo-tiled mention data")]
struct Args {
    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory with tiles_<category>.json files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    timespan: Option<String>,
    #[arg(long)]
    datetime: Option<String>,
    /// Seed for generated tiles when no data directory is given
    #[arg(long, default_value_t = 7)]
    seed: u64,
    #[arg(long, default_value = "heat-atlas.log")]
    log_file: PathBuf,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(HeatmapConfig, u64, PathBuf)> {
        let mut config = match &self.config {
            Some(path) => HeatmapConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => HeatmapConfig::default(),
        };
        if self.data_dir.is_some() {
            config.data_dir = self.data_dir;
        }
        if self.category.is_some() {
            config.category = self.category;
        }
        if self.timespan.is_some() {
            config.timespan_type = self.timespan;
        }
        if self.datetime.is_some() {
            config.datetime_selection = self.datetime;
        }
        config.validate()?;
        Ok((config, self.seed, self.log_file))
    }
}

fn init_logging(path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn run(terminal: &mut Terminal<CrosstermBackend<Stdout>>, state: &mut AppState) -> anyhow::Result<()> {
    state.refresh().await;

    loop {
        terminal.draw(|f| ui::draw(f, state))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) = event::read()? {
                if state.handle_input(code).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let (config, seed, log_file) = Args::parse().into_config()?;
    init_logging(&log_file)?;

    let fetcher = match &config.data_dir {
        Some(dir) => AnyFetcher::File(FileFetcher::new(TileDataDir::new(dir)?)),
        None => AnyFetcher::Synthetic(SyntheticFetcher::new(seed)),
    };
    info!("Starting heat-atlas - site={}, category={:?}", config.site_key, config.category);
    let mut state = AppState::new(&config, fetcher)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut state).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    result
}
