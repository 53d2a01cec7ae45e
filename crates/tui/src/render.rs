use nextop_core::dashboard::RenderFrame;
use nextop_core::instance::{Dsn, InstanceStatus};
use nextop_core::metric::{filter_rows, MetricKind};
use nextop_core::registry::InstanceEntry;
use nextop_core::snapshot::MetricSnapshot;
use nextop_core::view::ViewState;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::Frame;

use crate::app::{FormField, StatusLevel, TuiApp};
use crate::keymap::InputMode;

const INSTANCE_COLUMNS: [&str; 6] = ["name", "dbms", "group", "status", "latency", "last error"];

pub(crate) fn render(frame: &mut Frame<'_>, app: &TuiApp, view: &RenderFrame) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    frame.render_widget(header(app, view), chunks[0]);

    match view.view.current {
        ViewState::ConnectionSetup => render_setup(frame, chunks[1], app, view),
        ViewState::InstanceMenu => render_menu(frame, chunks[1], app, view),
        metric_view => render_metrics(frame, chunks[1], app, view, metric_view),
    }

    frame.render_widget(footer(app, view), chunks[2]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn header<'a>(app: &TuiApp, view: &'a RenderFrame) -> Paragraph<'a> {
    let focused = view
        .focused
        .as_deref()
        .and_then(|name| view.instances.iter().find(|entry| entry.name() == name));
    let instance = focused.map_or_else(
        || Span::raw("Instance: none"),
        |entry| {
            Span::styled(
                format!("Instance: {} ({})", entry.name(), entry.status),
                status_style(entry.status),
            )
        },
    );

    let mut spans = vec![
        Span::styled(
            format!(" View: {} ", view.view.current.title()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        instance,
        Span::raw(" | "),
        Span::raw(format!(
            "Online: {}/{}",
            view.online_count(),
            view.instances.len()
        )),
    ];
    if !app.filter.is_empty() || app.filter_editing {
        spans.push(Span::raw(" | "));
        spans.push(Span::raw(format!("Filter: {}", app.filter)));
    }
    if app.pending > 0 {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled("working", Style::default().fg(Color::Cyan)));
    }

    Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title("nextop"))
}

fn footer<'a>(app: &'a TuiApp, view: &RenderFrame) -> Paragraph<'a> {
    let hints = match app.input_mode(view.view.current) {
        InputMode::Form => {
            "Enter: connect | Tab: next field | Ctrl+D: reconnect all | Ctrl+O: menu | Esc: back | Ctrl+Q: quit"
        }
        InputMode::Filter => "Type to filter | Enter: keep filter | Esc: clear filter",
        InputMode::Navigation => {
            "1-5: views | m: menu | c: setup | r: reconnect | Tab: next instance | /: filter | x: remove | ?: help | q: quit"
        }
    };
    let style = match app.status.level {
        StatusLevel::Info => Style::default(),
        StatusLevel::Warning => Style::default().fg(Color::Yellow),
        StatusLevel::Error => Style::default().fg(Color::Red),
    };

    Paragraph::new(vec![
        Line::from(hints),
        Line::from(Span::styled(format!("Status: {}", app.status.text), style)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"))
}

fn render_setup(frame: &mut Frame<'_>, area: Rect, app: &TuiApp, view: &RenderFrame) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let mut lines = vec![
        Line::from("Add or update a monitored instance."),
        Line::from("DBMS is mysql or mariadb. A blank name saves as \"unnamed\"."),
        Line::from(""),
    ];
    for field in FormField::ALL {
        let active = app.form.active_field == field;
        let raw = app.form.value(field);
        // Typed text stays visible only while the field is being edited.
        let shown = if field == FormField::Dsn && !active {
            Dsn::new(raw).redacted()
        } else {
            raw.to_string()
        };
        let marker = if active { ">" } else { " " };
        let style = if active {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(
            format!("{marker} {}: {shown}", field.label()),
            style,
        )));
    }

    let form = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Connection Setup"))
        .alignment(Alignment::Left);
    frame.render_widget(form, columns[0]);
    frame.render_widget(instances_table(view), columns[1]);
}

fn render_menu(frame: &mut Frame<'_>, area: Rect, app: &TuiApp, view: &RenderFrame) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(28), Constraint::Min(20)])
        .split(area);

    let lines = ViewState::MENU
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let marker = if index == app.menu_cursor { ">" } else { " " };
            let key = if entry.is_metric_view() {
                format!("{}", index + 1)
            } else {
                "c".to_string()
            };
            Line::from(format!("{marker} [{key}] {}", entry.title()))
        })
        .collect::<Vec<_>>();

    let menu = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Instance Menu"));
    frame.render_widget(menu, columns[0]);
    frame.render_widget(instances_table(view), columns[1]);
}

fn render_metrics(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &TuiApp,
    view: &RenderFrame,
    metric_view: ViewState,
) {
    let kinds = metric_view.required_metrics();
    if view.focused.is_none() {
        let empty = Paragraph::new("No instance registered. Press c to open connection setup.")
            .block(Block::default().borders(Borders::ALL).title(metric_view.title()));
        frame.render_widget(empty, area);
        return;
    }

    let areas = grid(area, kinds.len());
    for (kind, cell_area) in kinds.iter().zip(areas) {
        let table = metric_table(
            *kind,
            view.snapshot(*kind),
            &app.filter,
            view.case_sensitive_filters,
            app.scroll,
        );
        frame.render_widget(table, cell_area);
    }
}

/// One full-size area, or a two-column grid for multi-metric views.
fn grid(area: Rect, count: usize) -> Vec<Rect> {
    if count <= 1 {
        return vec![area];
    }
    let row_count = count.div_ceil(2);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Fill(1); row_count])
        .split(area);

    let mut cells = Vec::with_capacity(count);
    for row in rows.iter() {
        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(*row);
        cells.extend(halves.iter().copied());
    }
    cells.truncate(count);
    cells
}

fn metric_table<'a>(
    kind: MetricKind,
    snapshot: Option<&'a MetricSnapshot>,
    filter: &str,
    case_sensitive: bool,
    scroll: usize,
) -> Table<'a> {
    let columns = kind.columns();
    let header = Row::new(columns.iter().copied().map(Cell::from))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let widths = vec![Constraint::Fill(1); columns.len()];

    let Some(snapshot) = snapshot else {
        return Table::new(Vec::<Row<'a>>::new(), widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(format!("{kind} (waiting for data)")));
    };

    let matching = filter_rows(&snapshot.rows, filter, case_sensitive);
    let total = snapshot.rows.len();
    let shown = matching.len();
    let skip = scroll.min(shown.saturating_sub(1));
    let rows = matching
        .into_iter()
        .skip(skip)
        .map(|row| Row::new((0..columns.len()).map(|index| Cell::from(row.display(index)))))
        .collect::<Vec<_>>();

    let mut title = format!("{kind} {shown}/{total}");
    if !filter.is_empty() {
        title.push_str(&format!(" [filter: {filter}]"));
    }
    let mut block = Block::default().borders(Borders::ALL);
    if let Some(error) = &snapshot.fetch_error {
        title.push_str(&format!(" (stale: {error})"));
        block = block.border_style(Style::default().fg(Color::Yellow));
    }

    Table::new(rows, widths).header(header).block(block.title(title))
}

fn instances_table(view: &RenderFrame) -> Table<'_> {
    let header = Row::new(INSTANCE_COLUMNS.iter().copied().map(Cell::from))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = view
        .instances
        .iter()
        .map(|entry| instance_row(entry, view.focused.as_deref() == Some(entry.name())))
        .collect::<Vec<_>>();
    let widths = [
        Constraint::Length(16),
        Constraint::Length(8),
        Constraint::Length(10),
        Constraint::Length(8),
        Constraint::Length(9),
        Constraint::Fill(1),
    ];

    Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Instances"))
}

fn instance_row(entry: &InstanceEntry, focused: bool) -> Row<'_> {
    let latency = entry
        .last_latency
        .map_or_else(|| "-".to_string(), |latency| format!("{}ms", latency.as_millis()));
    let row = Row::new(vec![
        Cell::from(entry.name()),
        Cell::from(entry.instance.dbms.as_str()),
        Cell::from(entry.instance.group.as_deref().unwrap_or("-")),
        Cell::from(entry.status.to_string()).style(status_style(entry.status)),
        Cell::from(latency),
        Cell::from(entry.last_error.as_deref().unwrap_or("")),
    ]);
    if focused {
        row.style(Style::default().add_modifier(Modifier::BOLD))
    } else {
        row
    }
}

fn status_style(status: InstanceStatus) -> Style {
    match status {
        InstanceStatus::Online => Style::default().fg(Color::Green),
        InstanceStatus::Offline => Style::default().fg(Color::Red),
    }
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Setup view"),
        Line::from("Enter: connect | Tab / Shift+Tab: switch field"),
        Line::from("Ctrl+D: reconnect all | Ctrl+O: instance menu | Esc: back"),
        Line::from(""),
        Line::from("Other views"),
        Line::from("1 dashboard, 2 processlist, 3 locks, 4 memory, 5 error log"),
        Line::from("m: menu | c: setup | r: reconnect all | Esc: back"),
        Line::from("Tab: focus next instance | x: remove focused instance"),
        Line::from("/: filter processlist or error log | arrows or jk: scroll"),
        Line::from("q or Ctrl+Q: quit | ?: toggle help"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}
