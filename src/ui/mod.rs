use crate::aqi::AqiBand;
use crate::app_state::{App, FocusArea, InputMode, ViewMode};
use chrono::DateTime;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([
            Constraint::Length(3), // 顶部标题栏
            Constraint::Min(0),    // 中间内容区域
            Constraint::Min(8),    // 底部命令/日志区域
        ])
        .split(f.size());

    render_top_bar(f, chunks[0], app);

    // 中间内容区域（左侧菜单 + 主视图）
    let middle_chunks = Layout::default()
        .direction(ratatui::layout::Direction::Horizontal)
        .constraints([Constraint::Length(20), Constraint::Min(0)])
        .split(chunks[1]);

    render_left_menu(f, middle_chunks[0], app);
    render_main_view(f, middle_chunks[1], app);
    render_bottom_bar(f, chunks[2], app);
}

fn band_color(band: AqiBand) -> Color {
    match band {
        AqiBand::Good => Color::Green,
        AqiBand::Moderate => Color::Yellow,
        AqiBand::UnhealthySensitive => Color::LightRed,
        AqiBand::Unhealthy => Color::Red,
        AqiBand::VeryUnhealthy => Color::Magenta,
        AqiBand::Hazardous => Color::DarkGray,
    }
}

fn aqi_span(aqi: Option<i32>) -> Span<'static> {
    match aqi {
        Some(a) => {
            let band = AqiBand::from_aqi(a);
            Span::styled(format!("{:>4}", a), Style::default().fg(band_color(band)))
        }
        None => Span::styled("   -", Style::default().fg(Color::Gray)),
    }
}

fn fmt_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn fmt_opt_ts(ts: Option<i64>) -> String {
    ts.map(fmt_ts).unwrap_or_else(|| "-".to_string())
}

fn main_block(title: String, app: &App) -> Block<'static> {
    Block::default().borders(Borders::ALL).title(title).style(
        if app.focus_area == FocusArea::MainView {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::White)
        },
    )
}

fn render_top_bar(f: &mut Frame, area: Rect, app: &App) {
    let title = Block::default()
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Cyan));

    let running: Vec<&str> = app
        .jobs
        .status
        .iter()
        .filter(|j| j.running)
        .map(|j| j.id.as_str())
        .collect();
    let title_text = Line::from(vec![
        Span::styled(
            " airq 空气质量控制台 ",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" - 站点 {}", app.stations_all.len())),
        Span::raw(if running.is_empty() {
            String::new()
        } else {
            format!("  运行中: {}", running.join(", "))
        }),
    ]);

    let paragraph = Paragraph::new(title_text)
        .block(title)
        .alignment(ratatui::layout::Alignment::Center);

    f.render_widget(paragraph, area);
}

fn render_left_menu(f: &mut Frame, area: Rect, app: &App) {
    let menu_items: Vec<ListItem> = ["站点", "最新读数", "日统计", "任务"]
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let is_selected = i == app.menu_selected_index;
            let is_active = matches!(
                (i, &app.view_mode),
                (0, ViewMode::Stations)
                    | (1, ViewMode::Readings)
                    | (2, ViewMode::DailyStats)
                    | (3, ViewMode::Jobs)
            );

            let style = if is_selected {
                if app.focus_area == FocusArea::Menu {
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Magenta)
                        .add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD)
                }
            } else if is_active {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            };

            let prefix = if is_active { "● " } else { "○ " };
            ListItem::new(format!("{}{}", prefix, text)).style(style)
        })
        .collect();

    let title = if app.focus_area == FocusArea::Menu {
        "菜单 (Enter/c 确认)"
    } else {
        "菜单 (← 切换)"
    };

    let menu =
        List::new(menu_items).block(Block::default().borders(Borders::ALL).title(title).style(
            if app.focus_area == FocusArea::Menu {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default().fg(Color::White)
            },
        ));

    f.render_widget(menu, area);
}

fn detail_title(app: &App, what: &str) -> String {
    let station = app
        .detail_station_id
        .and_then(|id| app.stations_all.iter().find(|s| s.id == id))
        .map(|s| format!("{} ({})", s.name, s.city))
        .unwrap_or_else(|| "未选择站点".to_string());
    if app.focus_area == FocusArea::MainView {
        format!("{what}: {station} (↑↓ 滚动, x 返回)")
    } else {
        format!("{what}: {station}")
    }
}

fn render_main_view(f: &mut Frame, area: Rect, app: &mut App) {
    match app.view_mode {
        ViewMode::Stations => {
            let items: Vec<ListItem> = app
                .station_list
                .iter()
                .map(|s| {
                    let marker = s
                        .latest_aqi
                        .map(|a| AqiBand::from_aqi(a).marker())
                        .unwrap_or("⚪");
                    ListItem::new(Line::from(vec![
                        Span::raw(format!("{} ", marker)),
                        aqi_span(s.latest_aqi),
                        Span::raw(format!("  {:<28}", s.name)),
                        Span::styled(
                            format!("{:<14}", s.city),
                            Style::default().fg(Color::Cyan),
                        ),
                        Span::styled(
                            format!(" {}", fmt_opt_ts(s.last_seen)),
                            Style::default().fg(Color::Gray),
                        ),
                    ]))
                })
                .collect();

            let band_filter = app.filter_band.map(|b| b.label()).unwrap_or("ALL");
            let query_info = if app.filter_query.is_empty() {
                String::new()
            } else {
                format!(" 搜索: \"{}\"", app.filter_query)
            };
            let title = if app.focus_area == FocusArea::MainView {
                format!(
                    "站点 [≥ {}]{} (f 切换, /filter 搜索, Enter/c 读数, ← 菜单)",
                    band_filter, query_info
                )
            } else {
                format!("站点 [≥ {}]{}", band_filter, query_info)
            };

            let list = List::new(items)
                .block(main_block(title, app))
                .highlight_style(
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::White)
                        .add_modifier(Modifier::BOLD),
                )
                .highlight_symbol(">> ");
            app.station_list_state.select(Some(app.selected_index));
            f.render_stateful_widget(list, area, &mut app.station_list_state);
        }
        ViewMode::Readings => {
            let mut lines = vec![
                Line::from(vec![Span::styled(
                    format!("{:<12} {:<6} {:>10} {:<6} {:>4}", "时间(UTC)", "污染物", "数值", "单位", "AQI"),
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )]),
                Line::from(""),
            ];
            for r in &app.readings {
                lines.push(Line::from(vec![
                    Span::raw(format!(
                        "{:<12} {:<6} {:>10.2} {:<6} ",
                        fmt_ts(r.recorded_at),
                        r.pollutant,
                        r.value,
                        r.unit
                    )),
                    aqi_span(r.aqi),
                ]));
            }
            if app.readings.is_empty() {
                lines.push(Line::from("暂无读数，输入 `ingest` 拉取数据"));
            }
            let paragraph = Paragraph::new(lines)
                .block(main_block(detail_title(app, "最新读数"), app))
                .scroll((app.detail_scroll, 0));
            f.render_widget(paragraph, area);
        }
        ViewMode::DailyStats => {
            let mut lines = vec![
                Line::from(vec![Span::styled(
                    format!(
                        "{:<10} {:<6} {:>9} {:>9} {:>4} {:>4} {:>5}",
                        "日期", "污染物", "均值", "P95", "AQI", "最大", "条数"
                    ),
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )]),
                Line::from(""),
            ];
            for d in &app.daily {
                lines.push(Line::from(vec![
                    Span::raw(format!(
                        "{:<10} {:<6} {:>9.2} {:>9.2} ",
                        d.day, d.pollutant, d.avg_value, d.p95_value
                    )),
                    aqi_span(d.avg_aqi),
                    Span::raw(" "),
                    aqi_span(d.max_aqi),
                    Span::raw(format!(" {:>5}", d.readings_count)),
                ]));
            }
            if app.daily.is_empty() {
                lines.push(Line::from("暂无日统计，输入 `aggregate` 或 `backfill` 生成"));
            }
            let paragraph = Paragraph::new(lines)
                .block(main_block(detail_title(app, "日统计"), app))
                .scroll((app.detail_scroll, 0));
            f.render_widget(paragraph, area);
        }
        ViewMode::Jobs => {
            let mut lines = vec![Line::from(vec![Span::styled(
                "--- 调度任务 ---",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )])];
            for j in &app.jobs.status {
                let (symbol, color) = if j.running {
                    ("▶", Color::Cyan)
                } else {
                    match j.last_outcome.as_deref() {
                        Some(o) if o.starts_with("ok") => ("✓", Color::Green),
                        Some(_) => ("✗", Color::Red),
                        None => ("○", Color::Gray),
                    }
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("{} ", symbol), Style::default().fg(color)),
                    Span::styled(
                        format!("{:<18}", j.id),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(format!(
                        " 下次 {:<12} 上次 {:<12}",
                        fmt_opt_ts(j.next_run),
                        fmt_opt_ts(j.last_run)
                    )),
                ]));
                if let Some(outcome) = &j.last_outcome {
                    lines.push(Line::from(Span::styled(
                        format!("    {}", outcome),
                        Style::default().fg(Color::Gray),
                    )));
                }
            }

            lines.push(Line::from(""));
            lines.push(Line::from(vec![Span::styled(
                "--- 最近任务日志 ---",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )]));
            for l in &app.jobs.logs {
                let color = if l.status == "success" {
                    Color::Green
                } else {
                    Color::Red
                };
                lines.push(Line::from(vec![
                    Span::raw(format!("{:<12} ", fmt_ts(l.started_at))),
                    Span::styled(format!("{:<8}", l.status), Style::default().fg(color)),
                    Span::raw(format!(
                        "{:<18} {:<24} 入库 {:>4} 重复 {:>4} 错误 {:>3}",
                        l.job,
                        l.provider.as_deref().unwrap_or("-"),
                        l.readings_saved,
                        l.duplicates,
                        l.errors
                    )),
                ]));
            }
            if app.jobs.logs.is_empty() {
                lines.push(Line::from("暂无任务日志"));
            }

            let title = if app.focus_area == FocusArea::MainView {
                "任务 (↑↓ 滚动, ← 切换菜单)".to_string()
            } else {
                "任务".to_string()
            };
            let paragraph = Paragraph::new(lines)
                .block(main_block(title, app))
                .scroll((app.detail_scroll, 0));
            f.render_widget(paragraph, area);
        }
    }
}

fn render_bottom_bar(f: &mut Frame, area: Rect, app: &App) {
    let bottom_chunks = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    // 命令输入区域
    let command_prompt = if app.input_mode == InputMode::Command {
        let mut spans = vec![Span::styled(
            "命令: ",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )];
        let cur = app.command_cursor.min(app.command_input.len());
        let (left, right) = app.command_input.split_at(cur);
        spans.push(Span::raw(left));
        spans.push(Span::styled("_", Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(right));

        // 补全建议以灰色显示
        if let Some(hint) = app.get_completion_hint() {
            spans.push(Span::styled(hint, Style::default().fg(Color::DarkGray)));
        }

        vec![
            Line::from(spans),
            Line::from("Enter执行 Esc取消 Tab补全 ←→光标 Home/End ↑历史 ↓下一条"),
        ]
    } else {
        vec![
            Line::from(vec![
                Span::styled("命令: ", Style::default().fg(Color::Yellow)),
                Span::raw("(按 / 进入命令模式，help 查看命令)"),
            ]),
            Line::from("/命令 f等级筛选 ←→切换 ↑↓导航 Enter/c确认 x返回 q退出"),
        ]
    };
    let command_paragraph = Paragraph::new(command_prompt).block(
        Block::default()
            .borders(Borders::ALL)
            .title(if app.input_mode == InputMode::Command {
                "命令输入模式"
            } else {
                "命令输入"
            })
            .style(if app.input_mode == InputMode::Command {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::White)
            }),
    );
    f.render_widget(command_paragraph, bottom_chunks[0]);

    // 日志区域，最新的在顶部
    let log_items: Vec<ListItem> = app
        .log_messages
        .iter()
        .rev()
        .take(20)
        .map(|msg| {
            let style = if msg.starts_with('✓') {
                Style::default().fg(Color::Green)
            } else if msg.starts_with('✗') {
                Style::default().fg(Color::Red)
            } else if msg.starts_with('⚠') {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(msg.as_str()).style(style)
        })
        .collect();

    let log = List::new(log_items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("日志 (共 {} 条)", app.log_messages.len()))
            .style(Style::default().fg(Color::White)),
    );
    f.render_widget(log, bottom_chunks[1]);
}
