use std::io::Stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};
use ratatui::{Frame, Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;

use crate::cli::STATUS_MESSAGE_TTL;
use crate::cli::actions;
use crate::cli::fetch::{ProcessInspector, SnapshotProvider};
use crate::cli::probe::{self, DiagnosticKind, DiagnosticSession};
use crate::cli::refresh::{self, UiEvent, reconcile_selection};
use crate::cli::state::ViewState;
use crate::cli::types::{ConnectionRecord, ProcessDetails, SortColumn};

const HEADERS: [&str; 8] = ["No", "Process", "PID", "Status", "Family", "Type", "Local Addr", "Remote Addr"];
const HEADER_COLUMNS: [SortColumn; 8] = [
    SortColumn::None,
    SortColumn::ProcessName,
    SortColumn::Pid,
    SortColumn::Status,
    SortColumn::Family,
    SortColumn::Kind,
    SortColumn::LocalAddr,
    SortColumn::RemoteAddr,
];
const MAX_CELL_WIDTH: usize = 30;
const TICK: Duration = Duration::from_millis(250);
const KEY_HINT: &str = "/ filter  s/S sort  k/K kill  p ping  t trace  l lookup  e export  r refresh  h help  q quit";

type Tui = Terminal<CrosstermBackend<Stdout>>;

pub struct TuiOptions {
    pub refresh_interval: Duration,
    pub export_base: PathBuf,
}

fn init_terminal() -> color_eyre::Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal() -> color_eyre::Result<()> {
    disable_raw_mode()?;
    execute!(std::io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show)?;
    Ok(())
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));
}

/// Forwards terminal input to the UI task until the receiver goes away.
fn spawn_input_reader(tx: mpsc::UnboundedSender<UiEvent>) {
    std::thread::spawn(move || {
        loop {
            if tx.is_closed() {
                break;
            }
            match event::poll(TICK) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if tx.send(UiEvent::Input(ev)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("terminal read failed: {e}");
                        let _ = tx.send(UiEvent::InputClosed);
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    log::warn!("terminal poll failed: {e}");
                    let _ = tx.send(UiEvent::InputClosed);
                    break;
                }
            }
        }
    });
}

pub async fn run_tui(
    state: ViewState,
    snapshot: Arc<dyn SnapshotProvider>,
    inspector: Arc<dyn ProcessInspector>,
    options: TuiOptions,
) -> color_eyre::Result<()> {
    install_panic_hook();
    let mut terminal = init_terminal()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_input_reader(tx.clone());
    let poller = refresh::spawn_refresh_loop(snapshot.clone(), state.clone(), options.refresh_interval, tx.clone());

    let mut app = App::new(state, snapshot, inspector, tx, options.export_base);
    let result = event_loop(&mut terminal, &mut app, &mut rx).await;

    app.close_modal();
    poller.stop().await;
    restore_terminal()?;
    terminal.show_cursor()?;
    result
}

async fn event_loop(terminal: &mut Tui, app: &mut App, rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> color_eyre::Result<()> {
    loop {
        app.sync_details();
        terminal.draw(|f| app.draw(f))?;
        if app.should_quit {
            return Ok(());
        }

        let probing = app.probe_streaming();
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => app.handle_event(ev),
                None => return Ok(()),
            },
            line = next_probe_line(&mut app.modal), if probing => app.on_probe_line(line),
            _ = tokio::time::sleep(TICK) => {}
        }
    }
}

async fn next_probe_line(modal: &mut Modal) -> Option<String> {
    match modal {
        Modal::Probe(view) => view.session.next_line().await,
        _ => std::future::pending().await,
    }
}

struct ProbeView {
    session: DiagnosticSession,
    lines: Vec<String>,
    ended: bool,
    scroll_back: usize,
}

enum Modal {
    None,
    Help,
    Details(ConnectionRecord, Result<ProcessDetails, String>),
    ConfirmKill { record: ConnectionRecord, force: bool, confirm: bool },
    Probe(ProbeView),
    ExportPrompt { input: String },
    ExportOverwrite { path: PathBuf },
}

#[derive(PartialEq, Eq)]
enum InputMode {
    Normal,
    Filtering,
}

struct App {
    state: ViewState,
    snapshot: Arc<dyn SnapshotProvider>,
    inspector: Arc<dyn ProcessInspector>,
    events: mpsc::UnboundedSender<UiEvent>,
    export_base: PathBuf,
    host: String,
    table_state: TableState,
    selected: Option<usize>,
    modal: Modal,
    input_mode: InputMode,
    filter_buffer: String,
    status: Option<(String, Instant)>,
    /// Selected row and its owner's metadata; `None` while the lookup runs.
    details: Option<(ConnectionRecord, Option<Result<ProcessDetails, String>>)>,
    should_quit: bool,
}

impl App {
    fn new(
        state: ViewState,
        snapshot: Arc<dyn SnapshotProvider>,
        inspector: Arc<dyn ProcessInspector>,
        events: mpsc::UnboundedSender<UiEvent>,
        export_base: PathBuf,
    ) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".into());
        let filter_buffer = state.spec().filter;
        Self {
            state,
            snapshot,
            inspector,
            events,
            export_base,
            host,
            table_state: TableState::default(),
            selected: None,
            modal: Modal::None,
            input_mode: InputMode::Normal,
            filter_buffer,
            status: None,
            details: None,
            should_quit: false,
        }
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some((message.into(), Instant::now()));
    }

    fn selected_record(&self) -> Option<ConnectionRecord> {
        let view = self.state.read();
        self.selected.and_then(|i| view.get(i).cloned())
    }

    fn reconcile(&mut self) {
        let len = self.state.read().len();
        self.selected = reconcile_selection(self.selected, len);
        self.table_state.select(self.selected);
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.state.read().len();
        if len == 0 {
            self.selected = None;
        } else {
            let current = self.selected.unwrap_or(0) as isize;
            let next = (current + delta).clamp(0, len as isize - 1);
            self.selected = Some(next as usize);
        }
        self.table_state.select(self.selected);
    }

    /// Starts a metadata lookup when the selected row changes. The result
    /// arrives later as `UiEvent::Details`.
    fn sync_details(&mut self) {
        let record = self.selected_record();
        let current = self.details.as_ref().map(|(r, _)| r);
        if record.as_ref() == current {
            return;
        }
        self.details = record.map(|r| {
            refresh::spawn_details_lookup(self.inspector.clone(), r.clone(), self.events.clone());
            (r, None)
        });
    }

    /// Drops results for rows that are no longer selected.
    fn on_details(&mut self, record: ConnectionRecord, result: Result<ProcessDetails, String>) {
        if let Some((current, slot)) = &mut self.details {
            if *current == record {
                *slot = Some(result);
            }
        }
    }

    fn probe_streaming(&self) -> bool {
        matches!(&self.modal, Modal::Probe(view) if !view.ended)
    }

    fn on_probe_line(&mut self, line: Option<String>) {
        if let Modal::Probe(view) = &mut self.modal {
            match line {
                Some(line) => view.lines.push(line),
                None => view.ended = true,
            }
        }
    }

    fn close_modal(&mut self) {
        if let Modal::Probe(view) = &mut self.modal {
            view.session.cancel();
        }
        self.modal = Modal::None;
    }

    fn manual_refresh(&self) {
        refresh::spawn_manual_refresh(self.snapshot.clone(), self.state.clone(), self.events.clone());
    }

    fn handle_event(&mut self, ev: UiEvent) {
        match ev {
            UiEvent::Refreshed => self.reconcile(),
            UiEvent::Details(record, result) => self.on_details(record, result),
            UiEvent::InputClosed => self.should_quit = true,
            UiEvent::Input(Event::Key(key)) => self.handle_key(key),
            UiEvent::Input(_) => {}
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        if !matches!(self.modal, Modal::None) {
            self.handle_modal_key(key);
            return;
        }

        if self.input_mode == InputMode::Filtering {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => self.input_mode = InputMode::Normal,
                KeyCode::Backspace => {
                    self.filter_buffer.pop();
                    self.apply_filter();
                }
                KeyCode::Char(c) => {
                    self.filter_buffer.push(c);
                    self.apply_filter();
                }
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Down => self.move_selection(1),
            KeyCode::Up => self.move_selection(-1),
            KeyCode::PageDown => self.move_selection(20),
            KeyCode::PageUp => self.move_selection(-20),
            KeyCode::Home => self.move_selection(isize::MIN / 2),
            KeyCode::End => self.move_selection(isize::MAX / 2),
            KeyCode::Enter => {
                match self.details.clone() {
                    Some((record, Some(details))) => self.modal = Modal::Details(record, details),
                    Some((_, None)) => self.set_status("Loading process details..."),
                    None => {}
                }
            }
            KeyCode::Char('/') => self.input_mode = InputMode::Filtering,
            KeyCode::Char('s') => {
                let column = self.state.cycle_sort_column();
                self.reconcile();
                self.set_status(format!("Sorting by {}", column.label()));
            }
            KeyCode::Char('S') => {
                self.state.toggle_sort_direction();
                self.reconcile();
            }
            KeyCode::Char('r') => self.manual_refresh(),
            KeyCode::Char('k') => self.confirm_kill(false),
            KeyCode::Char('K') => self.confirm_kill(true),
            KeyCode::Char('p') => self.start_probe(DiagnosticKind::Ping),
            KeyCode::Char('t') => self.start_probe(DiagnosticKind::Traceroute),
            KeyCode::Char('l') => self.start_probe(DiagnosticKind::Lookup),
            KeyCode::Char('e') => {
                if self.state.read().is_empty() {
                    self.set_status("No connections to export.");
                } else {
                    self.modal = Modal::ExportPrompt { input: String::new() };
                }
            }
            KeyCode::Char('h') | KeyCode::Char('?') => self.modal = Modal::Help,
            _ => {}
        }
    }

    fn apply_filter(&mut self) {
        self.state.set_filter(&self.filter_buffer);
        self.reconcile();
    }

    fn confirm_kill(&mut self, force: bool) {
        match self.selected_record() {
            Some(record) if record.pid != 0 => {
                self.modal = Modal::ConfirmKill { record, force, confirm: false };
            }
            _ => {}
        }
    }

    fn start_probe(&mut self, kind: DiagnosticKind) {
        let Some(record) = self.selected_record() else {
            return;
        };
        let Some(host) = record.remote_host() else {
            self.set_status("Selected connection has no remote address.");
            return;
        };
        let session = probe::run(kind, host);
        self.modal = Modal::Probe(ProbeView {
            session,
            lines: Vec::new(),
            ended: false,
            scroll_back: 0,
        });
    }

    fn handle_modal_key(&mut self, key: KeyEvent) {
        match &mut self.modal {
            Modal::None => {}
            Modal::Help => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('h') | KeyCode::Char('?') | KeyCode::Char('q')) {
                    self.modal = Modal::None;
                }
            }
            Modal::Details(..) => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Enter) {
                    self.modal = Modal::None;
                }
            }
            Modal::Probe(view) => match key.code {
                KeyCode::Esc | KeyCode::Char('q') => self.close_modal(),
                KeyCode::Up => view.scroll_back = (view.scroll_back + 1).min(view.lines.len()),
                KeyCode::Down => view.scroll_back = view.scroll_back.saturating_sub(1),
                KeyCode::End => view.scroll_back = 0,
                _ => {}
            },
            Modal::ConfirmKill { confirm, .. } => match key.code {
                KeyCode::Left | KeyCode::Right | KeyCode::Tab => *confirm = !*confirm,
                KeyCode::Char('y') => self.finish_kill(true),
                KeyCode::Char('n') | KeyCode::Esc => self.finish_kill(false),
                KeyCode::Enter => {
                    let accepted = *confirm;
                    self.finish_kill(accepted);
                }
                _ => {}
            },
            Modal::ExportPrompt { input } => match key.code {
                KeyCode::Esc => self.modal = Modal::None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                KeyCode::Enter => {
                    let path = actions::resolve_export_path(input, &self.export_base);
                    if path.exists() {
                        self.modal = Modal::ExportOverwrite { path };
                    } else {
                        self.modal = Modal::None;
                        self.export_to(path);
                    }
                }
                _ => {}
            },
            Modal::ExportOverwrite { path } => match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    let path = path.clone();
                    self.modal = Modal::None;
                    self.export_to(path);
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.modal = Modal::None;
                    self.set_status("Export cancelled.");
                }
                _ => {}
            },
        }
    }

    fn finish_kill(&mut self, accepted: bool) {
        let modal = std::mem::replace(&mut self.modal, Modal::None);
        let Modal::ConfirmKill { record, force, .. } = modal else {
            return;
        };
        if !accepted {
            return;
        }
        let result = if force { actions::force_kill(record.pid) } else { actions::terminate(record.pid) };
        match result {
            Ok(()) => {
                let verb = if force { "Killed" } else { "Terminated" };
                self.set_status(format!("{verb} {} (PID {})", record.process_name, record.pid));
                self.manual_refresh();
            }
            Err(e) => {
                log::warn!("kill of pid {} failed: {e:#}", record.pid);
                self.set_status(format!("Failed to kill PID {}: {e}", record.pid));
            }
        }
    }

    fn export_to(&mut self, path: PathBuf) {
        let records = self.state.read();
        if records.is_empty() {
            self.set_status("No connections to export.");
            return;
        }
        match actions::write_csv(&records, &path) {
            Ok(written) => self.set_status(format!("Exported {} connections to {}", records.len(), written.display())),
            Err(e) => {
                log::warn!("export failed: {e:#}");
                self.set_status(format!("Error exporting to CSV: {e:#}"));
            }
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let size = f.area();
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(3), Constraint::Length(1)].as_ref())
            .split(size);
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(64), Constraint::Percentage(36)].as_ref())
            .split(outer[0]);

        self.draw_table(f, chunks[0]);
        self.draw_details(f, chunks[1]);
        self.draw_filter(f, outer[1]);
        self.draw_footer(f, outer[2]);
        self.draw_modal(f, size);
    }

    fn draw_table(&mut self, f: &mut Frame, area: Rect) {
        let view = self.state.read();
        let spec = self.state.spec();

        let header = Row::new(HEADERS.iter().zip(HEADER_COLUMNS).map(|(h, col)| {
            let text = if col != SortColumn::None && col == spec.sort_column {
                format!("{h} {}", spec.direction.arrow())
            } else {
                h.to_string()
            };
            Cell::from(text)
        }))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));

        let rows = view.iter().enumerate().map(|(i, c)| {
            let pid = c.pid.to_string();
            let cells = [
                (i + 1).to_string(),
                truncate(&c.process_name, MAX_CELL_WIDTH),
                pid,
                truncate(&c.status, MAX_CELL_WIDTH),
                c.family.label().to_string(),
                c.kind.label().to_string(),
                truncate(&c.local_addr, MAX_CELL_WIDTH),
                truncate(&c.remote_addr, MAX_CELL_WIDTH),
            ];
            Row::new(cells).style(Style::default().fg(status_color(&c.status)))
        });

        let widths = [
            Constraint::Length(5),
            Constraint::Fill(2),
            Constraint::Length(7),
            Constraint::Length(12),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Fill(3),
            Constraint::Fill(3),
        ];
        let title = format!(" {} | {}/{} connections ", self.host, spec.visible, spec.total);
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED | Modifier::BOLD))
            .highlight_symbol("» ");

        self.table_state.select(self.selected);
        f.render_stateful_widget(table, area, &mut self.table_state);
    }

    fn draw_details(&self, f: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::ALL).title(" Details ");
        let paragraph = match &self.details {
            Some((record, Some(details))) => Paragraph::new(details_lines(record, details)),
            Some((record, None)) => Paragraph::new(vec![
                Line::from(format!(" {} (PID {})", record.process_name, record.pid)),
                Line::from(Span::styled(" Loading process details...", Style::default().fg(Color::DarkGray))),
            ]),
            None => Paragraph::new(Span::styled(" No connection selected", Style::default().fg(Color::DarkGray))),
        };
        f.render_widget(paragraph.block(block).wrap(Wrap { trim: false }), area);
    }

    fn draw_filter(&self, f: &mut Frame, area: Rect) {
        let editing = self.input_mode == InputMode::Filtering;
        let style = if editing { Style::default().fg(Color::Yellow) } else { Style::default() };
        let cursor = if editing { "_" } else { "" };
        let p = Paragraph::new(format!("{}{cursor}", self.filter_buffer))
            .block(Block::default().borders(Borders::ALL).title(" Filter (/) "))
            .style(style);
        f.render_widget(p, area);
    }

    fn draw_footer(&self, f: &mut Frame, area: Rect) {
        let line = match &self.status {
            Some((message, at)) if at.elapsed() < STATUS_MESSAGE_TTL => Line::from(vec![
                Span::styled("Status: ", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                Span::raw(message.clone()),
            ]),
            _ => Line::from(Span::styled(KEY_HINT, Style::default().fg(Color::Gray))),
        };
        f.render_widget(Paragraph::new(line), area);
    }

    fn draw_modal(&self, f: &mut Frame, size: Rect) {
        match &self.modal {
            Modal::None => {}
            Modal::Help => {
                let area = centered(size, 60, 70);
                f.render_widget(Clear, area);
                let p = Paragraph::new(help_lines())
                    .block(Block::default().borders(Borders::ALL).title(" Help (Esc to close) "))
                    .wrap(Wrap { trim: false });
                f.render_widget(p, area);
            }
            Modal::Details(record, details) => {
                let area = centered(size, 70, 60);
                f.render_widget(Clear, area);
                let p = Paragraph::new(details_lines(record, details))
                    .block(Block::default().borders(Borders::ALL).title(" Connection Details (Enter/Esc to close) "))
                    .wrap(Wrap { trim: false });
                f.render_widget(p, area);
            }
            Modal::ConfirmKill { record, force, confirm } => {
                let area = centered(size, 50, 25);
                f.render_widget(Clear, area);
                let action = if *force { "forcefully kill" } else { "kill" };
                let button = |label: &'static str, active: bool| {
                    let style = if active {
                        Style::default().fg(Color::Black).bg(Color::Yellow)
                    } else {
                        Style::default()
                    };
                    Span::styled(format!(" {label} "), style)
                };
                let text = vec![
                    Line::from(format!(
                        "Are you sure you want to {action} process '{}' (PID: {})?",
                        record.process_name, record.pid
                    )),
                    Line::from(""),
                    Line::from(vec![button("Confirm", *confirm), Span::raw("   "), button("Cancel", !*confirm)]),
                ];
                let p = Paragraph::new(text)
                    .block(Block::default().borders(Borders::ALL).title(" Confirm "))
                    .style(Style::default().fg(Color::Red))
                    .wrap(Wrap { trim: false });
                f.render_widget(p, area);
            }
            Modal::Probe(view) => {
                let area = centered(size, 80, 70);
                f.render_widget(Clear, area);
                let inner_height = area.height.saturating_sub(2) as usize;
                let end = view.lines.len().saturating_sub(view.scroll_back);
                let start = end.saturating_sub(inner_height);
                let lines: Vec<Line> = view.lines[start..end].iter().map(|l| Line::from(l.as_str())).collect();
                let title = format!(
                    " {} [{}] (Esc to close) ",
                    view.session.kind().title(view.session.target()),
                    view.session.state().label()
                );
                let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
                f.render_widget(p, area);
            }
            Modal::ExportPrompt { input } => {
                let area = centered(size, 60, 20);
                f.render_widget(Clear, area);
                let text = vec![
                    Line::from(format!("Export filename (blank for {}):", crate::cli::DEFAULT_EXPORT_FILE)),
                    Line::from(Span::styled(format!("{input}_"), Style::default().fg(Color::Yellow))),
                ];
                let p = Paragraph::new(text).block(Block::default().borders(Borders::ALL).title(" Export CSV "));
                f.render_widget(p, area);
            }
            Modal::ExportOverwrite { path } => {
                let area = centered(size, 60, 20);
                f.render_widget(Clear, area);
                let p = Paragraph::new(format!("File {} already exists. Overwrite? (y/n)", path.display()))
                    .block(Block::default().borders(Borders::ALL).title(" Export CSV "))
                    .style(Style::default().fg(Color::Red))
                    .wrap(Wrap { trim: false });
                f.render_widget(p, area);
            }
        }
    }
}

fn centered(size: Rect, width_pct: u16, height_pct: u16) -> Rect {
    let mw = (size.width as u32 * width_pct as u32 / 100) as u16;
    let mh = (size.height as u32 * height_pct as u32 / 100) as u16;
    let mw = mw.max(20).min(size.width);
    let mh = mh.max(5).min(size.height);
    let mx = size.x + (size.width - mw) / 2;
    let my = size.y + (size.height - mh) / 2;
    Rect::new(mx, my, mw, mh)
}

fn details_lines(record: &ConnectionRecord, details: &Result<ProcessDetails, String>) -> Vec<Line<'static>> {
    let key = |k: &str| Span::styled(format!("{k:<13}"), Style::default().fg(Color::Yellow));
    let (user, cmdline) = match details {
        Ok(d) => (d.username.clone(), d.cmdline.clone()),
        Err(e) => ("error".to_string(), format!("error fetching process data: {e}")),
    };
    vec![
        Line::from(vec![key("Process:"), Span::raw(record.process_name.clone())]),
        Line::from(vec![key("PID:"), Span::raw(record.pid.to_string())]),
        Line::from(vec![key("User:"), Span::raw(user)]),
        Line::from(""),
        Line::from(vec![key("Status:"), Span::raw(record.status.clone())]),
        Line::from(vec![key("Local Addr:"), Span::raw(record.local_addr.clone())]),
        Line::from(vec![key("Remote Addr:"), Span::raw(record.remote_addr.clone())]),
        Line::from(""),
        Line::from(key("Command:")),
        Line::from(cmdline),
    ]
}

fn help_lines() -> Vec<Line<'static>> {
    let section = |s: &'static str| Line::from(Span::styled(s, Style::default().add_modifier(Modifier::UNDERLINED)));
    let entry = |k: &'static str, d: &'static str| {
        Line::from(vec![Span::styled(format!("{k:<10}"), Style::default().fg(Color::Green)), Span::raw(d)])
    };
    vec![
        section("Navigation"),
        entry("↑/↓", "Move selection up/down"),
        entry("PgUp/PgDn", "Move by a page"),
        entry("Enter", "Show detailed info for selection"),
        Line::from(""),
        section("Actions"),
        entry("k", "Kill selected process (graceful)"),
        entry("K", "Force kill selected process (SIGKILL)"),
        entry("p", "Ping remote address of selection"),
        entry("t", "Traceroute to remote address"),
        entry("l", "Name lookup of remote address"),
        entry("/", "Filter connections"),
        entry("e", "Export visible connections to CSV"),
        Line::from(""),
        section("Sorting"),
        entry("s", "Cycle through sortable columns"),
        entry("S", "Toggle sort order (ASC/DESC)"),
        Line::from(""),
        section("Application"),
        entry("h / ?", "Show/hide this help"),
        entry("r", "Refresh connections now"),
        entry("q", "Quit"),
    ]
}

fn status_color(status: &str) -> Color {
    match status {
        "ESTABLISHED" => Color::Green,
        "LISTEN" => Color::Yellow,
        "CLOSE_WAIT" | "TIME_WAIT" => Color::LightRed,
        "NONE" | "" => Color::Reset,
        _ => Color::Red,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Aligned plain-text table for `--once` output.
pub fn render_plain(records: &[ConnectionRecord]) -> String {
    let mut out = format!(
        "{:<20} {:>7} {:<12} {:<7} {:<7} {:<30} {:<30}\n",
        "PROCESS", "PID", "STATUS", "FAMILY", "TYPE", "LOCAL", "REMOTE"
    );
    for c in records {
        out.push_str(&format!(
            "{:<20} {:>7} {:<12} {:<7} {:<7} {:<30} {:<30}\n",
            truncate(&c.process_name, 20),
            c.pid,
            c.status,
            c.family.label(),
            c.kind.label(),
            truncate(&c.local_addr, 30),
            truncate(&c.remote_addr, 30)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::types::{AddressFamily, SocketKind};
    use std::sync::Mutex;

    struct NoSockets;

    impl SnapshotProvider for NoSockets {
        fn fetch(&self) -> anyhow::Result<Vec<ConnectionRecord>> {
            Ok(Vec::new())
        }
    }

    /// Holds every lookup until the test drops the gate guard.
    struct GatedInspector {
        gate: Mutex<()>,
    }

    impl ProcessInspector for GatedInspector {
        fn describe(&self, pid: u32) -> anyhow::Result<ProcessDetails> {
            let _open = self.gate.lock().unwrap();
            Ok(ProcessDetails { username: "www".into(), cmdline: format!("nginx -p {pid}") })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_selection_change_does_not_wait_for_details() {
        let state = ViewState::new();
        let nginx = ConnectionRecord { process_name: "nginx".into(), pid: 80, ..Default::default() };
        let sshd = ConnectionRecord { process_name: "sshd".into(), pid: 22, ..Default::default() };
        state.replace_all(vec![nginx.clone(), sshd.clone()]);

        let inspector = Arc::new(GatedInspector { gate: Mutex::new(()) });
        let gate = inspector.gate.lock().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut app = App::new(state, Arc::new(NoSockets), inspector.clone(), tx, PathBuf::from("."));
        app.reconcile();

        // Returns immediately even though the lookup is stuck.
        app.sync_details();
        assert!(matches!(&app.details, Some((r, None)) if *r == nginx));

        // A late result for a row that is no longer selected is ignored.
        app.move_selection(1);
        app.sync_details();
        app.on_details(nginx.clone(), Ok(ProcessDetails::placeholder()));
        assert!(matches!(&app.details, Some((r, None)) if *r == sshd));

        drop(gate);
        let mut delivered = None;
        while delivered.is_none() {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
                Some(UiEvent::Details(r, result)) if r == sshd => delivered = Some((r, result)),
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
        let (record, result) = delivered.unwrap();
        app.handle_event(UiEvent::Details(record, result));
        match &app.details {
            Some((r, Some(Ok(details)))) => {
                assert_eq!(*r, sshd);
                assert_eq!(details.cmdline, "nginx -p 22");
            }
            _ => panic!("details not installed"),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 30), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_status_color() {
        assert_eq!(status_color("ESTABLISHED"), Color::Green);
        assert_eq!(status_color("LISTEN"), Color::Yellow);
        assert_eq!(status_color("TIME_WAIT"), Color::LightRed);
        assert_eq!(status_color(""), Color::Reset);
        assert_eq!(status_color("SYN_SENT"), Color::Red);
    }

    #[test]
    fn test_centered_stays_inside() {
        let size = Rect::new(0, 0, 100, 40);
        let area = centered(size, 60, 30);
        assert_eq!(area, Rect::new(20, 14, 60, 12));
        let tiny = centered(Rect::new(0, 0, 10, 4), 50, 50);
        assert_eq!(tiny, Rect::new(0, 0, 10, 4));
    }

    #[test]
    fn test_render_plain() {
        let records = vec![ConnectionRecord {
            process_name: "sshd".into(),
            pid: 22,
            status: "LISTEN".into(),
            family: AddressFamily::IPv4,
            kind: SocketKind::Tcp,
            local_addr: "0.0.0.0:22".into(),
            remote_addr: "0.0.0.0:0".into(),
            ..Default::default()
        }];
        let out = render_plain(&records);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("PROCESS"));
        assert!(lines[1].starts_with("sshd"));
        assert!(lines[1].contains("LISTEN"));
    }
}
