mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use delivery_bot_core::{
    NearestTargetStrategy, Position, RechargeAwareStrategy, RunStatus, Simulation,
    SimulationConfig, TargetStrategy, World, load_world_from_string,
};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    io::{self, Stdout},
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::metrics::{RunRecord, Summary, append_runs};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Delivery Bot: navigate the grid, collect packages and deliver them.",
    long_about = None
)]
struct Args {
    /// Seed for recreating the same world
    #[arg(short, long)]
    seed: Option<u64>,

    /// Load the world from a text map instead of generating one
    #[arg(short, long, value_name = "MAP_FILE")]
    map: Option<PathBuf>,

    /// Side length of generated worlds
    #[arg(long, default_value_t = 30)]
    grid_size: usize,

    /// Deliveries needed to finish a generated world; loaded maps use their drop-off count
    #[arg(long, default_value_t = 4)]
    items: usize,

    /// Delay between moves in milliseconds
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Head for the recharge site when the battery drops below this level
    #[arg(long, value_name = "BATTERY")]
    recharge_threshold: Option<i32>,

    /// Run without the terminal UI and print the results
    #[arg(long)]
    headless: bool,

    /// Number of headless runs; seeds increase by one per run
    #[arg(long, default_value_t = 1, requires = "headless")]
    runs: u64,

    /// Append one CSV row per run to this file
    #[arg(long, value_name = "CSV_FILE")]
    metrics: Option<PathBuf>,
}

impl Args {
    fn config(&self, run: u64) -> SimulationConfig {
        SimulationConfig {
            grid_size: self.grid_size,
            total_items: self.items,
            seed: self.seed.map(|seed| seed.wrapping_add(run)),
            ..SimulationConfig::default()
        }
    }

    fn strategy(&self) -> Box<dyn TargetStrategy> {
        match self.recharge_threshold {
            Some(threshold) => Box::new(RechargeAwareStrategy::new(
                Box::new(NearestTargetStrategy),
                threshold,
            )),
            None => Box::new(NearestTargetStrategy),
        }
    }

    fn build_simulation(&self, run: u64) -> Result<Simulation> {
        let mut config = self.config(run);
        let world = match &self.map {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading map file {}", path.display()))?;
                let world = load_world_from_string(&text)
                    .with_context(|| format!("loading map file {}", path.display()))?;
                // Every drop-off on a loaded map is one delivery.
                config.total_items = world.dropoffs.len();
                world
            }
            None => World::generate(&config).context("generating world")?,
        };
        Ok(Simulation::new(world, &config, self.strategy()))
    }
}

struct App {
    /// The core simulation.
    simulation: Simulation,
    /// Flag to control the main loop.
    should_quit: bool,
    paused: bool,
    /// Set once the end of the run has been logged.
    reported: bool,
}

impl App {
    fn new(simulation: Simulation) -> Self {
        App {
            simulation,
            should_quit: false,
            paused: false,
            reported: false,
        }
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) {
        if self.paused {
            return;
        }
        if let RunStatus::Finished(reason) = self.simulation.step() {
            if !self.reported {
                let state = self.simulation.state();
                info!(%reason, score = state.score, steps = state.steps, "game over");
                self.reported = true;
            }
        }
    }

    /// Stops the run and sets the quit flag.
    fn quit(&mut self) {
        self.simulation.abort_handle().abort();
        // Let the engine observe the abort so the run is recorded as such.
        self.simulation.step();
        self.should_quit = true;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.headless {
        init_tracing("info");
        return run_headless(&args);
    }

    // The alternate screen owns stdout; logs stay off unless RUST_LOG asks.
    init_tracing("off");
    let simulation = args.build_simulation(0)?;
    let mut terminal = setup_terminal()?;
    let mut app = App::new(simulation);
    let outcome = run_app(&mut terminal, &mut app, Duration::from_millis(args.tick_ms));
    restore_terminal(&mut terminal)?;
    outcome?;

    if let Some(result) = app.simulation.result() {
        println!(
            "Game over ({}). Final score: {}, total steps: {}, deliveries: {}",
            result.reason, result.score, result.steps, result.deliveries
        );
        if let Some(path) = &args.metrics {
            append_runs(path, &[RunRecord::from(&result)])?;
        }
    }
    Ok(())
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run_headless(args: &Args) -> Result<()> {
    let mut records = Vec::new();
    for run in 0..args.runs {
        let mut simulation = args.build_simulation(run)?;
        let result = simulation.run();
        info!(
            run,
            seed = ?args.config(run).seed,
            strategy = simulation.strategy_name(),
            reason = %result.reason,
            score = result.score,
            steps = result.steps,
            deliveries = result.deliveries,
            "run complete"
        );
        println!(
            "Run {}: {} | score {} | steps {} | deliveries {}/{}",
            run + 1,
            result.reason,
            result.score,
            result.steps,
            result.deliveries,
            simulation.total_items()
        );
        records.push(RunRecord::from(&result));
    }

    if let Some(summary) = Summary::from_runs(&records) {
        println!("{summary}");
    }
    if let Some(path) = &args.metrics {
        let last = append_runs(path, &records)?;
        info!(path = %path.display(), last, "metrics appended");
    }
    Ok(())
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    tick_rate: Duration,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    KeyCode::Char(' ') => app.paused = !app.paused,
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(70), // Area for the map
            Constraint::Percentage(20), // Area for the status panel
            Constraint::Percentage(10), // Area for help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], &app.simulation);
    render_status(frame, main_layout[1], app);

    let help_text = Paragraph::new("Press 'space' to pause, 'q' or 'Esc' to quit.")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Renders score, battery and cargo.
fn render_status(frame: &mut Frame, area: Rect, app: &App) {
    let simulation = &app.simulation;
    let agent = simulation.agent();
    let state = simulation.state();

    let battery_style = if agent.battery < 0 {
        Style::default().fg(Color::Red).bold()
    } else if agent.battery < 20 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Green)
    };
    let status = match simulation.status() {
        RunStatus::Running if app.paused => Span::styled("paused", Style::default().fg(Color::Cyan)),
        RunStatus::Running => Span::raw("running"),
        RunStatus::Finished(reason) => {
            Span::styled(format!("finished: {reason}"), Style::default().bold())
        }
    };
    let target = simulation
        .current_target()
        .map(|target| target.to_string())
        .unwrap_or_else(|| "-".to_string());

    let items = vec![
        ListItem::from(Line::from(vec![
            Span::raw(format!("Strategy: {}  Status: ", simulation.strategy_name())),
            status,
        ])),
        ListItem::from(Line::from(format!(
            "Score: {}  Steps: {}  Deliveries: {}/{}",
            state.score,
            state.steps,
            state.deliveries,
            simulation.total_items()
        ))),
        ListItem::from(Line::from(vec![
            Span::raw("Battery: "),
            Span::styled(agent.battery.to_string(), battery_style),
            Span::raw(format!(
                "  Cargo: {}  Position: {}  Target: {}",
                agent.cargo, agent.position, target
            )),
        ])),
    ];

    let status_widget =
        List::new(items).block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(status_widget, area);
}

/// Renders the grid onto the frame, two columns per cell.
fn render_map(frame: &mut Frame, area: Rect, simulation: &Simulation) {
    let map = simulation.map();
    let agent = simulation.agent().position;
    let path = simulation.planned_path();

    let mut lines: Vec<Line> = Vec::with_capacity(map.height());
    for y in 0..map.height() {
        let mut spans: Vec<Span> = Vec::with_capacity(map.width());
        for x in 0..map.width() {
            let position = Position::new(x, y);
            let span = if position == agent {
                Span::styled("@@", Style::default().fg(Color::Red).bold())
            } else if simulation.pickups().contains(&position) {
                Span::styled("[]", Style::default().fg(Color::Yellow))
            } else if simulation.dropoffs().contains(&position) {
                Span::styled("<>", Style::default().fg(Color::Green))
            } else if simulation.recharge() == Some(position) {
                Span::styled("++", Style::default().fg(Color::Cyan).bold())
            } else if map.is_blocked(position) {
                Span::styled("##", Style::default().fg(Color::DarkGray))
            } else if path.contains(&position) {
                Span::styled("··", Style::default().fg(Color::Yellow))
            } else {
                Span::raw("  ")
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Delivery Bot").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_bot_core::FinishReason;
    use ratatui::backend::TestBackend;

    const MAP: &str = "
        ST FL PK FL FL
        FL FL FL FL FL
        FL FL FL FL FL
        FL FL DO FL FL
    ";

    fn app() -> App {
        let world = load_world_from_string(MAP).expect("map");
        let config = SimulationConfig {
            total_items: 1,
            ..SimulationConfig::default()
        };
        App::new(Simulation::new(world, &config, Box::new(NearestTargetStrategy)))
    }

    #[test]
    fn args_parse_defaults() {
        let args = Args::parse_from(["delivery_bot_tui"]);
        assert_eq!(args.grid_size, 30);
        assert_eq!(args.items, 4);
        assert_eq!(args.tick_ms, 100);
        assert!(!args.headless);
        assert_eq!(args.config(0), SimulationConfig::default());
    }

    #[test]
    fn headless_runs_advance_the_seed() {
        let args = Args::parse_from(["delivery_bot_tui", "--headless", "--seed", "9", "--runs", "3"]);
        assert_eq!(args.config(0).seed, Some(9));
        assert_eq!(args.config(2).seed, Some(11));
    }

    #[test]
    fn runs_require_headless() {
        assert!(Args::try_parse_from(["delivery_bot_tui", "--runs", "3"]).is_err());
    }

    #[test]
    fn loaded_map_sets_the_delivery_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("open.map");
        std::fs::write(
            &path,
            "ST FL PK FL FL\nFL FL FL FL FL\nFL FL DO FL FL\nFL FL FL FL FL\nFL FL FL FL FL\n",
        )
        .expect("write map");

        let args = Args::parse_from([
            "delivery_bot_tui",
            "--headless",
            "--map",
            path.to_str().expect("utf-8 path"),
        ]);
        let mut simulation = args.build_simulation(0).expect("simulation");
        assert_eq!(simulation.total_items(), 1);

        let result = simulation.run();
        assert_eq!(result.reason, FinishReason::AllDeliveriesComplete);
        assert_eq!(result.deliveries, 1);
        assert_eq!(result.steps, 4);
        assert_eq!(result.score, 46);
    }

    #[test]
    fn headless_batch_appends_one_row_per_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let map = dir.path().join("open.map");
        let csv = dir.path().join("metrics.csv");
        std::fs::write(&map, MAP).expect("write map");

        let args = Args::parse_from([
            "delivery_bot_tui",
            "--headless",
            "--runs",
            "2",
            "--map",
            map.to_str().expect("utf-8 path"),
            "--metrics",
            csv.to_str().expect("utf-8 path"),
        ]);
        run_headless(&args).expect("headless batch");

        let text = std::fs::read_to_string(&csv).expect("read metrics");
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("1,"));
        assert!(rows[2].starts_with("2,"));
        // Two moves to the pickup and three to the drop-off.
        assert!(rows[2].ends_with(",5,45"));
    }

    #[test]
    fn paused_app_does_not_move() {
        let mut app = app();
        app.paused = true;
        app.tick();
        assert_eq!(app.simulation.state().steps, 0);
        app.paused = false;
        app.tick();
        assert_eq!(app.simulation.state().steps, 1);
    }

    #[test]
    fn quitting_aborts_the_run() {
        let mut app = app();
        app.tick();
        app.quit();
        assert!(app.should_quit);
        assert_eq!(
            app.simulation.status(),
            RunStatus::Finished(FinishReason::Aborted)
        );
    }

    #[test]
    fn map_draws_agent_sites_and_path() {
        let mut app = app();
        // Pickup after two moves, then one move towards the drop-off.
        for _ in 0..3 {
            app.tick();
        }
        let mut terminal = Terminal::new(TestBackend::new(40, 30)).expect("terminal");
        terminal.draw(|f| ui(f, &app)).expect("draw");

        let buffer = terminal.backend().buffer();
        let text: String = buffer.content().iter().map(|cell| cell.symbol()).collect();
        assert!(text.contains("@@"));
        assert!(text.contains("<>"));
        assert!(text.contains("··"));
        assert!(!text.contains("[]"));
        assert!(text.contains("Score: -3"));
    }
}
