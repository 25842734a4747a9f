use crate::aqi::AqiBand;
use crate::commands::AppCommand;
use crate::pipeline::JobStatus;
use crate::storage::entity::job_log::Model as JobLogModel;
use crossterm::event::KeyCode;
use ratatui::widgets::ListState;
use std::str::FromStr;
use tokio::sync::mpsc;

#[derive(PartialEq, Debug, Clone)]
pub enum ViewMode {
    Stations,
    Readings,
    DailyStats,
    Jobs,
}

#[derive(PartialEq, Debug, Clone)]
pub enum InputMode {
    Normal,
    Command,
}

#[derive(PartialEq, Debug, Clone)]
pub enum FocusArea {
    Menu,     // 焦点在左侧菜单
    MainView, // 焦点在主视图
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub id: i32,
    pub name: String,
    pub city: String,
    pub country: String,
    pub latest_aqi: Option<i32>,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    pub recorded_at: i64,
    pub pollutant: String,
    pub unit: String,
    pub value: f64,
    pub aqi: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub day: String,
    pub pollutant: String,
    pub avg_value: f64,
    pub p95_value: f64,
    pub avg_aqi: Option<i32>,
    pub max_aqi: Option<i32>,
    pub readings_count: i32,
}

#[derive(Debug, Clone, Default)]
pub struct JobsSnapshot {
    pub status: Vec<JobStatus>,
    pub logs: Vec<JobLogModel>,
}

#[derive(Debug)]
pub enum AppEvent {
    Log(String),
    Message(String),
    Error(String),
    Stations(Vec<StationRow>),
    StationDetail {
        station_id: i32,
        readings: Vec<ReadingRow>,
        daily: Vec<DailyRow>,
    },
    Jobs(JobsSnapshot),
}

pub struct App {
    pub view_mode: ViewMode,
    pub input_mode: InputMode,
    pub focus_area: FocusArea,
    pub menu_selected_index: usize,
    pub stations_all: Vec<StationRow>,
    pub station_list: Vec<StationRow>,
    pub selected_index: usize,
    pub station_list_state: ListState,
    pub detail_station_id: Option<i32>,
    pub readings: Vec<ReadingRow>,
    pub daily: Vec<DailyRow>,
    pub jobs: JobsSnapshot,
    pub detail_scroll: u16,
    pub command_input: String,
    pub command_cursor: usize,
    pub command_history: Vec<String>,
    pub command_history_index: Option<usize>,
    pub filter_band: Option<AqiBand>,
    pub filter_query: String,
    pub log_messages: Vec<String>,
    pub cmd_tx: mpsc::UnboundedSender<AppCommand>,
    pub evt_rx: Option<mpsc::UnboundedReceiver<AppEvent>>,
}

impl App {
    pub fn new(
        startup_info: Vec<String>,
        cmd_tx: mpsc::UnboundedSender<AppCommand>,
        evt_rx: mpsc::UnboundedReceiver<AppEvent>,
    ) -> App {
        let mut log_messages = vec!["应用已启动".to_string()];
        log_messages.extend(startup_info);

        App {
            view_mode: ViewMode::Stations,
            input_mode: InputMode::Normal,
            focus_area: FocusArea::Menu,
            menu_selected_index: 0,
            stations_all: Vec::new(),
            station_list: Vec::new(),
            selected_index: 0,
            station_list_state: {
                let mut s = ListState::default();
                s.select(Some(0));
                s
            },
            detail_station_id: None,
            readings: Vec::new(),
            daily: Vec::new(),
            jobs: JobsSnapshot::default(),
            detail_scroll: 0,
            command_input: String::new(),
            command_cursor: 0,
            command_history: Vec::new(),
            command_history_index: None,
            filter_band: None,
            filter_query: String::new(),
            log_messages,
            cmd_tx,
            evt_rx: Some(evt_rx),
        }
    }

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Log(msg) | AppEvent::Message(msg) => self.log_messages.push(msg),
            AppEvent::Error(msg) => self.log_messages.push(format!("✗ {msg}")),
            AppEvent::Stations(list) => {
                self.stations_all = list;
                self.apply_filters();
                self.clamp_selection();
            }
            AppEvent::StationDetail {
                station_id,
                readings,
                daily,
            } => {
                self.detail_station_id = Some(station_id);
                self.readings = readings;
                self.daily = daily;
            }
            AppEvent::Jobs(snapshot) => self.jobs = snapshot,
        }
    }

    pub fn selected_station(&self) -> Option<&StationRow> {
        self.station_list.get(self.selected_index)
    }

    /// 命令行补全提示：返回当前输入之后应补全的剩余部分
    pub fn get_completion_hint(&self) -> Option<String> {
        let commands = [
            "ingest", "aggregate", "backfill", "alerts", "alert", "seed", "user", "inbox", "run",
            "jobs", "help", "quit", "filter",
        ];
        let input = self.command_input.trim();
        if input.is_empty() {
            return None;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.len() == 1 {
            match parts[0] {
                "alerts" => return Some(" check".to_string()),
                "user" => return Some(" add".to_string()),
                _ => {}
            }
            return commands
                .iter()
                .find(|c| c.starts_with(parts[0]) && **c != parts[0])
                .map(|c| c[parts[0].len()..].to_string());
        }

        let subs: &[&str] = match parts[0] {
            "ingest" => &["force"],
            "alert" => &["add", "off"],
            "alerts" => &["check"],
            "run" => &["ingestion", "daily_aggregation", "alert_check"],
            _ => return None,
        };
        let cur = parts.get(1).copied().unwrap_or("");
        subs.iter()
            .find(|s| s.starts_with(cur) && **s != cur)
            .map(|s| s[cur.len()..].to_string())
    }

    pub fn clamp_selection(&mut self) {
        if self.selected_index >= self.station_list.len() {
            self.selected_index = self.station_list.len().saturating_sub(1);
        }
        self.station_list_state.select(Some(self.selected_index));
    }

    /// 按名称/城市与最低 AQI 等级过滤，最差的站点排在前面
    pub fn apply_filters(&mut self) {
        let query = self.filter_query.to_lowercase();
        let mut filtered: Vec<StationRow> = self
            .stations_all
            .iter()
            .filter(|s| {
                if let Some(band) = self.filter_band {
                    match s.latest_aqi {
                        Some(aqi) if AqiBand::from_aqi(aqi) >= band => {}
                        _ => return false,
                    }
                }
                query.is_empty()
                    || s.name.to_lowercase().contains(&query)
                    || s.city.to_lowercase().contains(&query)
            })
            .cloned()
            .collect();

        filtered.sort_by(|a, b| match (a.latest_aqi, b.latest_aqi) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        });

        self.station_list = filtered;
        if self.selected_index >= self.station_list.len() {
            self.selected_index = 0;
        }
        self.station_list_state.select(Some(self.selected_index));
    }

    /// 请求选中站点的读数与日统计
    pub fn request_detail(&mut self) {
        if let Some(station) = self.selected_station() {
            let station_id = station.id;
            self.detail_scroll = 0;
            let _ = self.cmd_tx.send(AppCommand::StationDetail { station_id });
        }
    }

    pub fn request_jobs(&mut self) {
        let _ = self.cmd_tx.send(AppCommand::Jobs);
    }

    fn finish_command(&mut self, cmd: String) {
        self.command_history.push(cmd);
        self.command_history_index = None;
        self.command_input.clear();
        self.command_cursor = 0;
        self.input_mode = InputMode::Normal;
    }

    /// 返回 true 表示退出应用
    pub fn handle_key_event(&mut self, key: KeyCode) -> bool {
        if self.input_mode == InputMode::Command {
            return self.handle_command_key(key);
        }

        // 正常模式下的按键处理
        match key {
            KeyCode::Char('/') => {
                self.input_mode = InputMode::Command;
                self.command_input.clear();
                self.command_cursor = 0;
                false
            }
            KeyCode::Char('q') => true,
            KeyCode::Left => {
                self.focus_area = FocusArea::Menu;
                false
            }
            KeyCode::Right => {
                self.focus_area = FocusArea::MainView;
                false
            }
            KeyCode::Up => {
                if self.focus_area == FocusArea::Menu {
                    self.menu_selected_index = self.menu_selected_index.saturating_sub(1);
                } else if self.view_mode == ViewMode::Stations {
                    if self.selected_index > 0 {
                        self.selected_index -= 1;
                        self.station_list_state.select(Some(self.selected_index));
                    }
                } else {
                    self.detail_scroll = self.detail_scroll.saturating_sub(1);
                }
                false
            }
            KeyCode::Down => {
                if self.focus_area == FocusArea::Menu {
                    let menu_items_count = 4;
                    if self.menu_selected_index < menu_items_count - 1 {
                        self.menu_selected_index += 1;
                    }
                } else if self.view_mode == ViewMode::Stations {
                    if self.selected_index < self.station_list.len().saturating_sub(1) {
                        self.selected_index += 1;
                        self.station_list_state.select(Some(self.selected_index));
                    }
                } else {
                    self.detail_scroll = self.detail_scroll.saturating_add(1);
                }
                false
            }
            KeyCode::Enter | KeyCode::Char('c') => {
                if self.focus_area == FocusArea::Menu {
                    match self.menu_selected_index {
                        0 => self.view_mode = ViewMode::Stations,
                        1 => {
                            self.view_mode = ViewMode::Readings;
                            self.request_detail();
                        }
                        2 => {
                            self.view_mode = ViewMode::DailyStats;
                            self.request_detail();
                        }
                        3 => {
                            self.view_mode = ViewMode::Jobs;
                            self.request_jobs();
                        }
                        _ => {}
                    }
                    self.focus_area = FocusArea::MainView;
                } else if self.view_mode == ViewMode::Stations && !self.station_list.is_empty() {
                    // 在站点列表按 Enter 直接进入读数页
                    self.view_mode = ViewMode::Readings;
                    self.menu_selected_index = 1;
                    self.request_detail();
                }
                false
            }
            KeyCode::Char('x') => {
                if self.focus_area == FocusArea::MainView && self.view_mode != ViewMode::Stations {
                    self.view_mode = ViewMode::Stations;
                    self.menu_selected_index = 0;
                }
                false
            }
            KeyCode::Char('f') => {
                if self.view_mode == ViewMode::Stations {
                    self.filter_band = match self.filter_band {
                        None => Some(AqiBand::Moderate),
                        Some(AqiBand::Moderate) => Some(AqiBand::UnhealthySensitive),
                        Some(AqiBand::UnhealthySensitive) => Some(AqiBand::Unhealthy),
                        _ => None,
                    };
                    self.apply_filters();
                }
                false
            }
            _ => false,
        }
    }

    fn handle_command_key(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::Enter => {
                let cmd_owned = self.command_input.trim().to_string();
                if cmd_owned.is_empty() {
                    self.command_input.clear();
                    self.command_cursor = 0;
                    self.input_mode = InputMode::Normal;
                    return false;
                }

                // filter 只作用于本地列表
                if let Some(rest) = cmd_owned.strip_prefix("filter") {
                    let args = rest.trim();
                    if args.is_empty() || args == "clear" {
                        self.filter_query.clear();
                        self.filter_band = None;
                    } else {
                        self.filter_query = args.to_string();
                    }
                    self.apply_filters();
                    self.finish_command(cmd_owned);
                    return false;
                }

                let app_cmd = AppCommand::from_str(&cmd_owned)
                    .unwrap_or_else(|_| AppCommand::Unknown(cmd_owned.clone()));
                let quit = app_cmd == AppCommand::Quit;
                if app_cmd == AppCommand::Jobs {
                    self.view_mode = ViewMode::Jobs;
                    self.menu_selected_index = 3;
                }
                let _ = self.cmd_tx.send(app_cmd);
                self.finish_command(cmd_owned);
                quit
            }
            KeyCode::Esc => {
                self.command_input.clear();
                self.command_cursor = 0;
                self.input_mode = InputMode::Normal;
                false
            }
            KeyCode::Tab => {
                if let Some(hint) = self.get_completion_hint() {
                    let insert = format!("{} ", hint);
                    self.command_input.insert_str(self.command_cursor, &insert);
                    self.command_cursor += insert.len();
                }
                false
            }
            KeyCode::Up => {
                if self.command_history.is_empty() {
                    return false;
                }
                let next = match self.command_history_index {
                    None => self.command_history.len().saturating_sub(1),
                    Some(i) => i.saturating_sub(1),
                };
                self.command_history_index = Some(next);
                if let Some(cmd) = self.command_history.get(next) {
                    self.command_input = cmd.clone();
                    self.command_cursor = self.command_input.len();
                }
                false
            }
            KeyCode::Down => {
                let Some(i) = self.command_history_index else {
                    return false;
                };
                let next = i + 1;
                if next >= self.command_history.len() {
                    self.command_history_index = None;
                    self.command_input.clear();
                    self.command_cursor = 0;
                    return false;
                }
                self.command_history_index = Some(next);
                if let Some(cmd) = self.command_history.get(next) {
                    self.command_input = cmd.clone();
                    self.command_cursor = self.command_input.len();
                }
                false
            }
            KeyCode::Backspace => {
                if self.command_cursor > 0 {
                    let idx = prev_char_boundary(&self.command_input, self.command_cursor);
                    self.command_input.remove(idx);
                    self.command_cursor = idx;
                }
                false
            }
            KeyCode::Delete => {
                if self.command_cursor < self.command_input.len() {
                    self.command_input.remove(self.command_cursor);
                }
                false
            }
            KeyCode::Left => {
                if self.command_cursor > 0 {
                    self.command_cursor = prev_char_boundary(&self.command_input, self.command_cursor);
                }
                false
            }
            KeyCode::Right => {
                if let Some(c) = self.command_input[self.command_cursor..].chars().next() {
                    self.command_cursor += c.len_utf8();
                }
                false
            }
            KeyCode::Home => {
                self.command_cursor = 0;
                false
            }
            KeyCode::End => {
                self.command_cursor = self.command_input.len();
                false
            }
            KeyCode::Char(c) => {
                self.command_input.insert(self.command_cursor, c);
                self.command_cursor += c.len_utf8();
                false
            }
            _ => false,
        }
    }
}

/// 光标按字节计数，退格需回到上一个字符边界
fn prev_char_boundary(s: &str, cursor: usize) -> usize {
    s[..cursor]
        .char_indices()
        .next_back()
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> (App, mpsc::UnboundedReceiver<AppCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (_evt_tx, evt_rx) = mpsc::unbounded_channel();
        (App::new(Vec::new(), cmd_tx, evt_rx), cmd_rx)
    }

    fn station(id: i32, name: &str, city: &str, aqi: Option<i32>) -> StationRow {
        StationRow {
            id,
            name: name.to_string(),
            city: city.to_string(),
            country: "Colombia".to_string(),
            latest_aqi: aqi,
            last_seen: None,
        }
    }

    fn type_command(app: &mut App, s: &str) -> bool {
        app.handle_key_event(KeyCode::Char('/'));
        for c in s.chars() {
            app.handle_key_event(KeyCode::Char(c));
        }
        app.handle_key_event(KeyCode::Enter)
    }

    #[test]
    fn stations_sorted_worst_first_and_filtered() {
        let (mut app, _rx) = app();
        app.apply_event(AppEvent::Stations(vec![
            station(1, "Medellín Station", "Medellín", Some(42)),
            station(2, "Bogotá Station", "Bogotá", Some(120)),
            station(3, "Cali Station", "Cali", None),
        ]));
        let ids: Vec<i32> = app.station_list.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        app.filter_band = Some(AqiBand::UnhealthySensitive);
        app.apply_filters();
        assert_eq!(app.station_list.len(), 1);

        type_command(&mut app, "filter cali");
        assert!(app.station_list.is_empty());
        type_command(&mut app, "filter clear");
        assert_eq!(app.station_list.len(), 3);
    }

    #[test]
    fn commands_are_sent_to_background() {
        let (mut app, mut rx) = app();
        assert!(!type_command(&mut app, "ingest force"));
        assert_eq!(rx.try_recv().unwrap(), AppCommand::Ingest { force: true });
        assert_eq!(app.command_history, vec!["ingest force".to_string()]);

        assert!(!type_command(&mut app, "jobs"));
        assert_eq!(app.view_mode, ViewMode::Jobs);
        assert!(type_command(&mut app, "quit"));
    }

    #[test]
    fn enter_on_station_requests_detail() {
        let (mut app, mut rx) = app();
        app.apply_event(AppEvent::Stations(vec![station(7, "Cali Station", "Cali", Some(60))]));
        app.focus_area = FocusArea::MainView;
        app.handle_key_event(KeyCode::Enter);
        assert_eq!(app.view_mode, ViewMode::Readings);
        assert_eq!(rx.try_recv().unwrap(), AppCommand::StationDetail { station_id: 7 });
    }

    #[test]
    fn backspace_respects_multibyte_chars() {
        let (mut app, _rx) = app();
        app.handle_key_event(KeyCode::Char('/'));
        for c in "μg".chars() {
            app.handle_key_event(KeyCode::Char(c));
        }
        app.handle_key_event(KeyCode::Backspace);
        app.handle_key_event(KeyCode::Backspace);
        assert!(app.command_input.is_empty());
        assert_eq!(app.command_cursor, 0);
    }

    #[test]
    fn completion_hints() {
        let (mut app, _rx) = app();
        app.command_input = "ing".to_string();
        assert_eq!(app.get_completion_hint().as_deref(), Some("est"));
        app.command_input = "alert o".to_string();
        assert_eq!(app.get_completion_hint().as_deref(), Some("ff"));
        app.command_input = "run d".to_string();
        assert_eq!(app.get_completion_hint().as_deref(), Some("aily_aggregation"));
    }
}
