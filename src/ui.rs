use anyhow::Result;
use chrono::NaiveDate;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use stock_status::{
    format_date, format_price, mask_vin, ExpiryStatus, MakeFilter, ReconciledRow, ReportFilter,
    ReportStats,
};

const PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    StockSearch,
    PlateSearch,
}

pub struct App {
    pub rows: Vec<ReconciledRow>,
    pub filtered_rows: Vec<ReconciledRow>,
    pub state: TableState,
    pub filter: ReportFilter,
    pub categories: Vec<String>,
    pub today: NaiveDate,
    pub warning_days: i64,
    pub show_detail: bool,
    pub input_mode: InputMode,
    pub stats: ReportStats,
}

impl App {
    pub fn new(
        rows: Vec<ReconciledRow>,
        categories: Vec<String>,
        today: NaiveDate,
        warning_days: i64,
    ) -> Self {
        let stats = ReportStats::compute(&rows, &categories, today, warning_days);
        let mut app = App {
            rows,
            filtered_rows: Vec::new(),
            state: TableState::default(),
            filter: ReportFilter::default(),
            categories,
            today,
            warning_days,
            show_detail: false,
            input_mode: InputMode::Normal,
            stats,
        };
        app.refresh();
        app
    }

    /// Re-run the filter and keep the cursor in range.
    pub fn refresh(&mut self) {
        self.filtered_rows = self
            .filter
            .apply(&self.rows, &self.categories)
            .into_iter()
            .cloned()
            .collect();

        let selected = match self.state.selected() {
            _ if self.filtered_rows.is_empty() => None,
            Some(i) => Some(i.min(self.filtered_rows.len() - 1)),
            None => Some(0),
        };
        self.state.select(selected);
    }

    pub fn selected_row(&self) -> Option<&ReconciledRow> {
        self.state.selected().and_then(|i| self.filtered_rows.get(i))
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn cycle_make(&mut self) {
        self.filter.make = self.filter.make.cycle(&self.categories);
        self.refresh();
    }

    pub fn toggle_learner(&mut self) {
        self.filter.learner_only = !self.filter.learner_only;
        self.refresh();
    }

    pub fn toggle_needs_listing(&mut self) {
        self.filter.needs_listing_only = !self.filter.needs_listing_only;
        self.refresh();
    }

    pub fn toggle_needs_transfer(&mut self) {
        self.filter.needs_transfer_only = !self.filter.needs_transfer_only;
        self.refresh();
    }

    pub fn cycle_sort(&mut self) {
        self.filter.sort_key = self.filter.sort_key.next();
        self.refresh();
    }

    pub fn toggle_order(&mut self) {
        self.filter.sort_order = self.filter.sort_order.toggle();
        self.refresh();
    }

    pub fn clear_filter(&mut self) {
        self.filter = ReportFilter::default();
        self.refresh();
    }

    /// Row count for the table border, with the total while filters are set.
    pub fn table_title(&self) -> String {
        if self.filter.is_default() {
            format!(" Stock ({}) ", self.filtered_rows.len())
        } else {
            format!(
                " Stock ({} of {}, c to clear) ",
                self.filtered_rows.len(),
                self.rows.len()
            )
        }
    }

    fn search_text(&mut self) -> Option<&mut String> {
        match self.input_mode {
            InputMode::Normal => None,
            InputMode::StockSearch => Some(&mut self.filter.stock_search),
            InputMode::PlateSearch => Some(&mut self.filter.plate_search),
        }
    }

    pub fn push_search_char(&mut self, c: char) {
        if let Some(text) = self.search_text() {
            text.push(c);
        }
        self.refresh();
    }

    pub fn pop_search_char(&mut self) {
        if let Some(text) = self.search_text() {
            text.pop();
        }
        self.refresh();
    }

    pub fn next(&mut self) {
        let len = self.filtered_rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.filtered_rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.filtered_rows.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map_or(0, |i| (i + PAGE_SIZE).min(len - 1));
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.filtered_rows.is_empty() {
            return;
        }
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(PAGE_SIZE));
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res?;
    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.input_mode != InputMode::Normal {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => app.input_mode = InputMode::Normal,
                KeyCode::Backspace => app.pop_search_char(),
                KeyCode::Char(c) => app.push_search_char(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Enter => app.toggle_detail(),
            KeyCode::Char('m') => app.cycle_make(),
            KeyCode::Char('l') => app.toggle_learner(),
            KeyCode::Char('n') => app.toggle_needs_listing(),
            KeyCode::Char('t') => app.toggle_needs_transfer(),
            KeyCode::Char('s') => app.cycle_sort(),
            KeyCode::Char('o') => app.toggle_order(),
            KeyCode::Char('/') => app.input_mode = InputMode::StockSearch,
            KeyCode::Char('p') => app.input_mode = InputMode::PlateSearch,
            KeyCode::Char('c') => app.clear_filter(),
            KeyCode::Down | KeyCode::Char('j') => app.next(),
            KeyCode::Up | KeyCode::Char('k') => app.previous(),
            KeyCode::PageDown => app.page_down(),
            KeyCode::PageUp => app.page_up(),
            KeyCode::Home => {
                if !app.filtered_rows.is_empty() {
                    app.state.select(Some(0));
                }
            }
            KeyCode::End => {
                if !app.filtered_rows.is_empty() {
                    app.state.select(Some(app.filtered_rows.len() - 1));
                }
            }
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Summary + active filters
            Constraint::Min(0),    // Stock table
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2], app);
}

fn expiry_color(status: ExpiryStatus) -> Color {
    match status {
        ExpiryStatus::Expired => Color::Red,
        ExpiryStatus::ExpiringSoon => Color::Yellow,
        ExpiryStatus::Valid => Color::Green,
        ExpiryStatus::Unknown => Color::DarkGray,
    }
}

fn on_off(label: &str, on: bool) -> Span<'static> {
    let style = if on {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Span::styled(format!("{label} "), style)
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let stats = &app.stats;

    let summary = Line::from(vec![
        Span::styled(
            format!("Stock: {}", stats.total),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  |  "),
        Span::styled(
            format!("Transfer: {}", stats.needs_registration_transfer),
            Style::default().fg(Color::Red),
        ),
        Span::raw("  "),
        Span::styled(
            format!("Listing: {}", stats.needs_listing_created),
            Style::default().fg(Color::Yellow),
        ),
        Span::raw("  "),
        Span::styled(
            format!("Plate check: {}", stats.needs_plate_check),
            Style::default().fg(Color::Magenta),
        ),
        Span::raw("  "),
        Span::styled(
            format!("Learner: {}", stats.learner_approved),
            Style::default().fg(Color::Green),
        ),
    ]);

    let make_style = if app.filter.make == MakeFilter::All {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
    };

    let filters = Line::from(vec![
        Span::styled(format!("Make: {} ", app.filter.make.label()), make_style),
        on_off("[Learner]", app.filter.learner_only),
        on_off("[Needs listing]", app.filter.needs_listing_only),
        on_off("[Needs transfer]", app.filter.needs_transfer_only),
        Span::styled(
            format!(
                " Sort: {} ({})",
                app.filter.sort_key.label(),
                app.filter.sort_order.label()
            ),
            Style::default().fg(Color::Cyan),
        ),
    ]);

    let header = Paragraph::new(vec![summary, filters]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(" Stock Status - {} ", app.today.format("%d-%b-%Y"))),
    );

    f.render_widget(header, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = [
        "Stock", "Into Stock", "Make", "Model", "VIN", "Plate", "Expiry", "Listed", "Price", "Status",
    ]
    .iter()
    .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.filtered_rows.iter().map(|row| {
        let expiry = row.expiry_status(app.today, app.warning_days);
        let status_color = if row.status.needs_registration_transfer {
            Color::Red
        } else if row.status.is_clear() {
            Color::Green
        } else {
            Color::Yellow
        };

        Row::new(vec![
            Cell::from(row.stock_number.clone()),
            Cell::from(format_date(row.date_into_stock)),
            Cell::from(truncate(&row.make, 12)),
            Cell::from(truncate(&row.model, 20)),
            Cell::from(mask_vin(&row.vin)),
            Cell::from(row.plate_number.clone()),
            Cell::from(format_date(row.expiry_date)).style(Style::default().fg(expiry_color(expiry))),
            Cell::from(format_date(row.date_listed)),
            Cell::from(format_price(row.listed_price)),
            Cell::from(row.status.to_string()).style(Style::default().fg(status_color)),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Length(12),
            Constraint::Length(13),
            Constraint::Length(21),
            Constraint::Length(11),
            Constraint::Length(7),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(app.table_title()),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let spans = match app.input_mode {
        InputMode::StockSearch | InputMode::PlateSearch => {
            let (label, text) = if app.input_mode == InputMode::StockSearch {
                ("Stock #", &app.filter.stock_search)
            } else {
                ("Plate", &app.filter.plate_search)
            };
            vec![
                Span::styled(format!(" {label} search: "), Style::default().fg(Color::Cyan)),
                Span::styled(format!("{text}_"), Style::default().fg(Color::White)),
                Span::raw("  ("),
                key("Enter"),
                Span::raw(" done)"),
            ]
        }
        InputMode::Normal => {
            let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
            vec![
                Span::styled(
                    format!(" Row: {}/{} ", selected, app.filtered_rows.len()),
                    Style::default().fg(Color::Cyan),
                ),
                Span::raw("| "),
                key("m"),
                Span::raw(" Make "),
                key("l"),
                Span::raw(" Learner "),
                key("n"),
                Span::raw(" Listing "),
                key("t"),
                Span::raw(" Transfer "),
                key("/"),
                Span::raw(" Stock# "),
                key("p"),
                Span::raw(" Plate "),
                key("s"),
                Span::raw("/"),
                key("o"),
                Span::raw(" Sort "),
                key("c"),
                Span::raw(" Clear "),
                key("Enter"),
                Span::raw(" Details "),
                Span::styled("q", Style::default().fg(Color::Red)),
                Span::raw(" Quit"),
            ]
        }
    };

    let status_bar = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn detail_line(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("  {label}: "),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Stock Details ");

    let Some(row) = app.selected_row() else {
        f.render_widget(Paragraph::new("No stock selected").block(block), area);
        return;
    };

    let expiry = row.expiry_status(app.today, app.warning_days);
    let learner = match row.learner_approved {
        Some(true) => "Yes",
        Some(false) => "No",
        None => "Not looked up",
    };

    let section = |title: &'static str| {
        Line::from(Span::styled(
            format!("  {title}"),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        ))
    };

    let mut content = vec![
        Line::from(""),
        detail_line("Stock Number", row.stock_number.clone(), Color::White),
        detail_line("Date Into Stock", format_date(row.date_into_stock), Color::White),
        detail_line("Make", row.make.clone(), Color::White),
        detail_line("Model", row.model.clone(), Color::White),
        detail_line("VIN", mask_vin(&row.vin), Color::White),
        Line::from(""),
        section("REGISTRATION"),
        Line::from(""),
        detail_line(
            "Plate Number",
            if row.plate_number.is_empty() { "(none)".to_string() } else { row.plate_number.clone() },
            Color::White,
        ),
        detail_line("Learner Approved", learner.to_string(), Color::White),
        detail_line(
            "Expiry",
            format!("{} [{}]", format_date(row.expiry_date), expiry.label()),
            expiry_color(expiry),
        ),
        detail_line(
            "Issue",
            row.registration_issue.map(|i| i.label()).unwrap_or("-").to_string(),
            if row.registration_issue.is_some() { Color::Red } else { Color::Green },
        ),
        Line::from(""),
        section("LISTING"),
        Line::from(""),
        detail_line("Date Listed", format_date(row.date_listed), Color::White),
        detail_line("Listed Price", format_price(row.listed_price), Color::White),
        Line::from(""),
        section("ACTIONS"),
        Line::from(""),
    ];

    if row.status.is_clear() {
        content.push(Line::from(Span::styled("  Nothing to do", Style::default().fg(Color::Green))));
    }
    for label in row.status.labels() {
        content.push(Line::from(Span::styled(format!("  • {label}"), Style::default().fg(Color::Red))));
    }

    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Press Enter to close",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));

    f.render_widget(Paragraph::new(content).block(block), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use stock_status::StatusFlags;

    fn row(stock: &str, make: &str, listing: bool) -> ReconciledRow {
        ReconciledRow {
            stock_number: stock.to_string(),
            date_into_stock: None,
            stock_type: "Used".to_string(),
            make: make.to_string(),
            model: "M".to_string(),
            vin: "VIN0000000000001".to_string(),
            plate_number: "ABC12".to_string(),
            learner_approved: Some(false),
            expiry_date: None,
            registration_issue: None,
            date_listed: None,
            listed_price: None,
            status: StatusFlags {
                needs_listing_created: listing,
                ..Default::default()
            },
        }
    }

    fn app() -> App {
        App::new(
            vec![row("U1", "BMW", true), row("U2", "KTM", false), row("U3", "Honda", true)],
            vec!["BMW".to_string(), "KAW".to_string(), "KTM".to_string()],
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            30,
        )
    }

    #[test]
    fn test_filters_keep_selection_in_range() {
        let mut app = app();
        app.state.select(Some(2));

        app.toggle_needs_listing();
        assert_eq!(app.filtered_rows.len(), 2);
        assert_eq!(app.state.selected(), Some(1));

        app.cycle_make(); // BMW
        assert_eq!(app.filtered_rows.len(), 1);
        assert_eq!(app.selected_row().map(|r| r.stock_number.as_str()), Some("U1"));

        app.clear_filter();
        assert_eq!(app.filtered_rows.len(), 3);
    }

    #[test]
    fn test_table_title_shows_active_filter() {
        let mut app = app();
        assert_eq!(app.table_title(), " Stock (3) ");

        app.toggle_needs_listing();
        assert_eq!(app.table_title(), " Stock (2 of 3, c to clear) ");

        // A changed sort order alone is not the default view either.
        app.clear_filter();
        app.toggle_order();
        assert!(app.table_title().contains("of 3"));

        app.clear_filter();
        assert_eq!(app.table_title(), " Stock (3) ");
    }

    #[test]
    fn test_search_input_edits_active_field() {
        let mut app = app();
        app.input_mode = InputMode::StockSearch;
        app.push_search_char('u');
        app.push_search_char('2');
        assert_eq!(app.filtered_rows.len(), 1);

        app.pop_search_char();
        assert_eq!(app.filter.stock_search, "u");
        assert_eq!(app.filtered_rows.len(), 3);
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app();
        app.previous();
        assert_eq!(app.state.selected(), Some(2));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
        app.page_down();
        assert_eq!(app.state.selected(), Some(2));
    }
}
