mod app_service;
mod app_state;
mod aqi;
mod commands;
mod config;
mod notify;
mod pipeline;
mod providers;
mod storage;
#[cfg(test)]
mod testing;
mod ui;

use chrono::Local;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::app_service::{deactivate_alert, load_inbox, load_jobs, load_station_detail, refresh_ui};
use crate::app_state::{App, AppEvent};
use crate::commands::{AppCommand, HELP_TEXT};
use crate::config::{AppConfig, FeedMode};
use crate::notify::{Notifier, TelegramNotifier};
use crate::pipeline::{alerts, seeder, JobRequest, Scheduler, SchedulerError};
use crate::storage::repository::{ReadingRepository, UserRepository};
use crate::ui::draw;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> io::Result<()> {
    let mut startup_info = Vec::new();

    // 加载 .env
    match dotenv::dotenv() {
        Ok(path) => startup_info.push(format!("✓ 找到 .env 文件: {}", path.display())),
        Err(_) => startup_info.push("⚠ 未找到 .env 文件，使用系统环境变量".to_string()),
    }

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("配置错误: {}", e);
            return Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()));
        }
    };

    init_logging(cfg.headless)?;

    startup_info.push(format!(
        "数据源模式: {}",
        match cfg.feed_mode {
            FeedMode::Mock => "mock",
            FeedMode::Http => "http",
        }
    ));

    // 初始化数据库
    let db = match storage::establish_connection(&cfg.database_url).await {
        Ok(connection) => {
            startup_info.push("✓ 数据库连接成功".to_string());
            connection
        }
        Err(e) => {
            eprintln!("无法连接数据库: {}", e);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("数据库连接失败: {}", e),
            ));
        }
    };

    if let (Ok(readings), Ok(users)) = (
        ReadingRepository::count(&db).await,
        UserRepository::count_active(&db).await,
    ) {
        startup_info.push(format!("数据库现有 {} 条读数, {} 个活跃用户", readings, users));
    }

    let telegram = TelegramNotifier::from_config(&cfg);
    if telegram.enabled() {
        startup_info.push("✓ Telegram 通知已启用".to_string());
    } else {
        startup_info.push("⚠ 未配置 TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID，Telegram 通知已禁用".to_string());
    }
    let notifier: Arc<dyn Notifier> = Arc::new(telegram);

    if cfg.headless {
        for line in &startup_info {
            log::info!("{}", line);
        }
        let scheduler = Arc::new(Scheduler::new(db, cfg.clone(), notifier, None));
        scheduler.start();
        log::info!("Running headless, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        log::info!("Shutting down");
        return Ok(());
    }

    // 创建核心 Channel (使用 AppCommand)
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<AppCommand>();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<AppEvent>();

    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        cfg.clone(),
        notifier.clone(),
        Some(evt_tx.clone()),
    ));
    scheduler.start();

    // 启动单后台任务模型 (Actor)
    let evt_tx_bg = evt_tx.clone();
    tokio::spawn(async move {
        // 周期性刷新 UI（站点列表 + 任务状态）
        {
            let dbc = db.clone();
            let schedc = scheduler.clone();
            let txc = evt_tx_bg.clone();
            tokio::spawn(async move {
                loop {
                    refresh_ui(&dbc, &schedc, &txc).await;
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            });
        }

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                AppCommand::Ingest { force } => {
                    submit_job(&scheduler, JobRequest::Ingest { force }, &evt_tx_bg);
                }
                AppCommand::Aggregate { day } => {
                    submit_job(&scheduler, JobRequest::Aggregate { day }, &evt_tx_bg);
                }
                AppCommand::Backfill { start, end } => {
                    submit_job(&scheduler, JobRequest::Backfill { start, end }, &evt_tx_bg);
                }
                AppCommand::AlertsCheck => {
                    submit_job(&scheduler, JobRequest::AlertCheck, &evt_tx_bg);
                }
                AppCommand::Seed { days } => {
                    let dbc = db.clone();
                    let tx = evt_tx_bg.clone();
                    let _ = tx.send(AppEvent::Message(format!("开始生成 {} 天历史数据...", days)));
                    tokio::spawn(async move {
                        match seeder::seed_history(&dbc, days).await {
                            Ok(s) => {
                                let _ = tx.send(AppEvent::Log(format!(
                                    "✓ 历史数据生成完成: {} 个站点, 入库 {}, 重复 {}",
                                    s.stations, s.saved, s.duplicates
                                )));
                            }
                            Err(e) => {
                                let _ = tx.send(AppEvent::Error(format!("生成历史数据失败: {:#}", e)));
                            }
                        }
                    });
                }
                AppCommand::UserAdd {
                    username,
                    email,
                    role,
                } => match UserRepository::create(&db, &username, &email, None, &role).await {
                    Ok(user) => {
                        let _ = evt_tx_bg.send(AppEvent::Log(format!(
                            "✓ 已创建用户 [ID: {}] {} ({})",
                            user.id, user.username, role
                        )));
                    }
                    Err(e) => {
                        let _ = evt_tx_bg.send(AppEvent::Error(format!("创建用户失败: {}", e)));
                    }
                },
                AppCommand::AlertAdd {
                    user_id,
                    station_id,
                    pollutant,
                    condition,
                    threshold,
                    method,
                } => {
                    match alerts::create_alert(
                        &db, user_id, station_id, &pollutant, condition, threshold, method,
                    )
                    .await
                    {
                        Ok(alert) => {
                            let _ = evt_tx_bg.send(AppEvent::Log(format!(
                                "✓ 已创建告警 [ID: {}]: 站点 {} {} {} {} ({})",
                                alert.id, station_id, pollutant, condition, threshold, method
                            )));
                        }
                        Err(e) => {
                            let _ = evt_tx_bg.send(AppEvent::Error(format!("创建告警失败: {}", e)));
                        }
                    }
                }
                AppCommand::AlertOff { alert_id } => {
                    let _ = evt_tx_bg.send(deactivate_alert(&db, alert_id).await);
                }
                AppCommand::Inbox { user_id } => match load_inbox(&db, user_id).await {
                    Ok(lines) if lines.is_empty() => {
                        let _ = evt_tx_bg
                            .send(AppEvent::Message(format!("用户 {} 没有站内通知", user_id)));
                    }
                    Ok(lines) => {
                        for line in lines {
                            let _ = evt_tx_bg.send(AppEvent::Log(line));
                        }
                    }
                    Err(e) => {
                        let _ = evt_tx_bg.send(AppEvent::Error(format!("查询通知失败: {}", e)));
                    }
                },
                AppCommand::RunJob { job } => {
                    if scheduler.is_running(job) {
                        let _ = evt_tx_bg
                            .send(AppEvent::Log(format!("⚠ 任务 {} 正在运行，忽略本次请求", job)));
                        continue;
                    }
                    let _ = evt_tx_bg.send(AppEvent::Message(format!("已触发任务: {}", job)));
                    let sched = scheduler.clone();
                    let tx = evt_tx_bg.clone();
                    tokio::spawn(async move {
                        if let Err(SchedulerError::AlreadyRunning(job)) = sched.run_now(job).await {
                            let _ = tx.send(AppEvent::Log(format!(
                                "⚠ 任务 {} 正在运行，忽略本次请求",
                                job
                            )));
                        }
                    });
                }
                AppCommand::Jobs => match load_jobs(&db, &scheduler).await {
                    Ok(snapshot) => {
                        let _ = evt_tx_bg.send(AppEvent::Jobs(snapshot));
                    }
                    Err(e) => {
                        let _ = evt_tx_bg.send(AppEvent::Error(format!("查询任务失败: {}", e)));
                    }
                },
                AppCommand::StationDetail { station_id } => {
                    match load_station_detail(&db, station_id).await {
                        Ok(evt) => {
                            let _ = evt_tx_bg.send(evt);
                        }
                        Err(e) => {
                            let _ = evt_tx_bg.send(AppEvent::Error(format!("查询失败: {}", e)));
                        }
                    }
                }
                AppCommand::Help => {
                    let _ = evt_tx_bg.send(AppEvent::Message(HELP_TEXT.to_string()));
                }
                AppCommand::Quit => {
                    let _ = evt_tx_bg.send(AppEvent::Message("收到退出命令".to_string()));
                }
                AppCommand::Unknown(msg) => {
                    if !msg.is_empty() {
                        let _ = evt_tx_bg.send(AppEvent::Error(msg));
                    }
                }
            }
        }
    });

    // TUI 初始化
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(startup_info, cmd_tx, evt_rx);

    // 主循环
    let res = match app.evt_rx.take() {
        Some(rx) => run_app_loop(&mut terminal, &mut app, rx).await,
        None => Ok(()),
    };

    // 恢复终端
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

/// 交互模式下日志写入文件（终端归 TUI 使用），headless 模式写 stderr
fn init_logging(headless: bool) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("airq", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .parse_default_env();

    if !headless {
        let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let log_dir = std::path::PathBuf::from("logs");
        std::fs::create_dir_all(&log_dir)?;
        let log_file = std::fs::File::create(log_dir.join(format!("airq-{}.log", ts)))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

/// 后台执行任务；失败结果由 scheduler 自己写入日志面板
fn submit_job(
    scheduler: &Arc<Scheduler>,
    req: JobRequest,
    evt_tx: &mpsc::UnboundedSender<AppEvent>,
) {
    let job = req.job();
    if scheduler.is_running(job) {
        let _ = evt_tx.send(AppEvent::Log(format!("⚠ 任务 {} 正在运行，忽略本次请求", job)));
        return;
    }
    let _ = evt_tx.send(AppEvent::Message(format!("已触发任务: {}", job)));
    let sched = scheduler.clone();
    let tx = evt_tx.clone();
    tokio::spawn(async move {
        if let Err(SchedulerError::AlreadyRunning(job)) = sched.submit(req).await {
            let _ = tx.send(AppEvent::Log(format!("⚠ 任务 {} 正在运行，忽略本次请求", job)));
        }
    });
}

async fn run_app_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    mut evt_rx: mpsc::UnboundedReceiver<AppEvent>,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| draw(f, app))?;

        while let Ok(event) = evt_rx.try_recv() {
            app.apply_event(event);
        }

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_key_event(key.code) {
                    return Ok(());
                }
            }
        }
    }
}
