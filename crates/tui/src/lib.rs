use std::io::{self, Stdout};
use std::panic;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::{cursor, execute};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use nextop_core::dashboard::{Dashboard, Intent, Outcome, RenderFrame};
use nextop_core::metric::MetricBackend;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

mod app;
mod keymap;
mod render;

use app::TuiApp;
use keymap::map_key_event;
use render::render;

const TICK_RATE: Duration = Duration::from_millis(120);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[must_use]
pub fn ui_name() -> &'static str {
    "nextop-tui"
}

/// Runs the terminal UI on the calling thread until the operator quits.
///
/// Intents run as tasks on `runtime`; their outcomes come back over a channel
/// and land in the status line on the next redraw. `notes` are startup
/// messages shown before any input.
pub fn run<B: MetricBackend>(
    dashboard: Arc<Dashboard<B>>,
    runtime: Handle,
    notes: Vec<String>,
) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &dashboard, &runtime, &notes);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

/// Restores the terminal before the default hook prints a panic.
pub fn install_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show);
        original_hook(panic_info);
    }));
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

struct Dispatcher<B: MetricBackend> {
    dashboard: Arc<Dashboard<B>>,
    runtime: Handle,
    outcomes: UnboundedSender<Outcome>,
}

impl<B: MetricBackend> Dispatcher<B> {
    fn dispatch(&self, intent: Intent) {
        debug!(class = ?intent.action_class(), "dispatching intent");
        let dashboard = Arc::clone(&self.dashboard);
        let outcomes = self.outcomes.clone();
        self.runtime.spawn(async move {
            let outcome = dashboard.handle_intent(intent).await;
            // The receiver is gone only once the UI has exited.
            let _ = outcomes.send(outcome);
        });
    }
}

fn run_loop<B: MetricBackend>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    dashboard: &Arc<Dashboard<B>>,
    runtime: &Handle,
    notes: &[String],
) -> Result<(), TuiError> {
    let (sender, mut receiver) = unbounded_channel();
    let dispatcher = Dispatcher {
        dashboard: Arc::clone(dashboard),
        runtime: runtime.clone(),
        outcomes: sender,
    };
    let mut app = TuiApp::with_notes(notes);
    let mut last_view = dashboard.views().current();
    info!(view = %last_view, "ui started");

    loop {
        drain_outcomes(&mut app, &mut receiver);
        if app.should_quit {
            break;
        }

        let frame = dashboard.frame(app.focused.as_deref());
        if frame.view.current != last_view {
            last_view = frame.view.current;
            app.on_view_changed();
        }
        app.focused.clone_from(&frame.focused);
        terminal.draw(|f| render(f, &app, &frame))?;

        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(intent) = process_key(&mut app, key, &frame) {
                        app.pending += 1;
                        dispatcher.dispatch(intent);
                    }
                }
            }
        }
    }

    info!("ui stopped");
    Ok(())
}

fn process_key(app: &mut TuiApp, key: KeyEvent, frame: &RenderFrame) -> Option<Intent> {
    let mode = app.input_mode(frame.view.current);
    let msg = map_key_event(key, mode)?;
    app.handle(msg, frame)
}

fn drain_outcomes(app: &mut TuiApp, receiver: &mut UnboundedReceiver<Outcome>) {
    while let Ok(outcome) = receiver.try_recv() {
        app.apply_outcome(outcome);
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use nextop_core::dashboard::{Intent, Outcome};
    use nextop_core::view::ViewState;
    use tokio::sync::mpsc::unbounded_channel;

    use super::{drain_outcomes, process_key, ui_name};
    use crate::app::tests::frame;
    use crate::app::TuiApp;

    #[test]
    fn ui_name_is_stable() {
        assert_eq!(ui_name(), "nextop-tui");
    }

    #[test]
    fn plain_q_types_in_setup_but_quits_elsewhere() {
        let mut app = TuiApp::default();
        let q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);

        assert_eq!(
            process_key(&mut app, q, &frame(ViewState::ConnectionSetup, &[])),
            None
        );
        assert_eq!(app.form.dsn, "q");
        assert_eq!(
            process_key(&mut app, q, &frame(ViewState::Processlist, &["prod"])),
            Some(Intent::Quit)
        );
    }

    #[test]
    fn queued_outcomes_are_applied_in_order() {
        let mut app = TuiApp::default();
        app.pending = 2;
        let (sender, mut receiver) = unbounded_channel();
        sender
            .send(Outcome::Info("Switched to Locks".to_string()))
            .expect("receiver alive");
        sender.send(Outcome::Quit).expect("receiver alive");

        drain_outcomes(&mut app, &mut receiver);
        assert_eq!(app.status.text, "Switched to Locks");
        assert!(app.should_quit);
        assert_eq!(app.pending, 0);
    }
}
