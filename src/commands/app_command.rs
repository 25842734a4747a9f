use crate::pipeline::alerts::{NotificationMethod, TriggerCondition};
use crate::pipeline::JobId;
use chrono::NaiveDate;
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;

pub const HELP_TEXT: &str = "可用命令: ingest [force] | aggregate [YYYY-MM-DD] | backfill <from> <to> | alerts check | seed [days] | user add <username> <email> [role] | alert add <user_id> <station_id> <pollutant> <exceeds|below|equals> <threshold> [telegram|email|in-app|all] | alert off <alert_id> | inbox <user_id> | run <ingestion|daily_aggregation|alert_check> | jobs | help | quit";

const DEFAULT_SEED_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Ingest {
        force: bool,
    },
    Aggregate {
        day: Option<NaiveDate>,
    },
    Backfill {
        start: NaiveDate,
        end: NaiveDate,
    },
    AlertsCheck,
    Seed {
        days: u32,
    },
    UserAdd {
        username: String,
        email: String,
        role: String,
    },
    AlertAdd {
        user_id: i32,
        station_id: i32,
        pollutant: String,
        condition: TriggerCondition,
        threshold: f64,
        method: NotificationMethod,
    },
    AlertOff {
        alert_id: i32,
    },
    Inbox {
        user_id: i32,
    },
    RunJob {
        job: JobId,
    },
    Jobs,
    StationDetail {
        station_id: i32,
    },
    Help,
    Quit,
    Unknown(String),
}

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.is_empty() {
            return Ok(AppCommand::Unknown("".to_string()));
        }

        match parts[0] {
            "ingest" => match parts.get(1).copied() {
                None => Ok(AppCommand::Ingest { force: false }),
                Some("force" | "-f" | "--force") => Ok(AppCommand::Ingest { force: true }),
                Some(_) => Ok(AppCommand::Unknown("用法: ingest [force]".to_string())),
            },
            "aggregate" => match parts.get(1) {
                None => Ok(AppCommand::Aggregate { day: None }),
                Some(d) => match parse_date(d) {
                    Some(day) => Ok(AppCommand::Aggregate { day: Some(day) }),
                    None => Ok(AppCommand::Unknown("用法: aggregate [YYYY-MM-DD]".to_string())),
                },
            },
            "backfill" => {
                let start = parts.get(1).and_then(|d| parse_date(d));
                let end = parts.get(2).and_then(|d| parse_date(d));
                match (start, end) {
                    (Some(start), Some(end)) if start <= end => {
                        Ok(AppCommand::Backfill { start, end })
                    }
                    (Some(_), Some(_)) => Ok(AppCommand::Unknown(
                        "backfill: 开始日期不能晚于结束日期".to_string(),
                    )),
                    _ => Ok(AppCommand::Unknown(
                        "用法: backfill <YYYY-MM-DD> <YYYY-MM-DD>".to_string(),
                    )),
                }
            }
            "alerts" => {
                if parts.get(1) == Some(&"check") {
                    Ok(AppCommand::AlertsCheck)
                } else {
                    Ok(AppCommand::Unknown("用法: alerts check".to_string()))
                }
            }
            "seed" => match parts.get(1) {
                None => Ok(AppCommand::Seed {
                    days: DEFAULT_SEED_DAYS,
                }),
                Some(n) => match n.parse::<u32>() {
                    Ok(days) if (1..=365).contains(&days) => Ok(AppCommand::Seed { days }),
                    _ => Ok(AppCommand::Unknown("用法: seed [1-365]".to_string())),
                },
            },
            "user" => parse_user(&parts[1..]),
            "alert" => parse_alert(&parts[1..]),
            "inbox" => match parts.get(1).and_then(|s| s.parse::<i32>().ok()) {
                Some(user_id) => Ok(AppCommand::Inbox { user_id }),
                None => Ok(AppCommand::Unknown("用法: inbox <user_id>".to_string())),
            },
            "run" => match parts.get(1).map(|s| s.parse::<JobId>()) {
                Some(Ok(job)) => Ok(AppCommand::RunJob { job }),
                Some(Err(e)) => Ok(AppCommand::Unknown(e.to_string())),
                None => Ok(AppCommand::Unknown(
                    "用法: run <ingestion|daily_aggregation|alert_check>".to_string(),
                )),
            },
            "jobs" => Ok(AppCommand::Jobs),
            "__INTERNAL_STATION__" => match parts.get(1).and_then(|s| s.parse::<i32>().ok()) {
                Some(station_id) => Ok(AppCommand::StationDetail { station_id }),
                None => Ok(AppCommand::Unknown("缺少站点 ID".to_string())),
            },
            "help" | "h" => Ok(AppCommand::Help),
            "quit" | "q" | "exit" => Ok(AppCommand::Quit),
            _ => Ok(AppCommand::Unknown(format!("未知命令: {}", parts[0]))),
        }
    }
}

fn parse_user(args: &[&str]) -> Result<AppCommand, ()> {
    const USAGE: &str = "用法: user add <username> <email> [Citizen|Researcher|Administrator]";
    let (Some(&"add"), Some(username), Some(email)) = (args.first(), args.get(1), args.get(2))
    else {
        return Ok(AppCommand::Unknown(USAGE.to_string()));
    };
    if !is_valid_email(email) {
        return Ok(AppCommand::Unknown(format!("邮箱格式不正确: {email}")));
    }
    let role = match args.get(3) {
        None => "Citizen".to_string(),
        Some(r) => match canonical_role(r) {
            Some(role) => role.to_string(),
            None => return Ok(AppCommand::Unknown(format!("未知角色: {r}"))),
        },
    };
    Ok(AppCommand::UserAdd {
        username: username.to_string(),
        email: email.to_string(),
        role,
    })
}

fn parse_alert(args: &[&str]) -> Result<AppCommand, ()> {
    match args.first().copied() {
        Some("add") => {
            const USAGE: &str = "用法: alert add <user_id> <station_id> <pollutant> <exceeds|below|equals> <threshold> [method]";
            if args.len() < 6 {
                return Ok(AppCommand::Unknown(USAGE.to_string()));
            }
            let (Ok(user_id), Ok(station_id)) = (args[1].parse::<i32>(), args[2].parse::<i32>())
            else {
                return Ok(AppCommand::Unknown(USAGE.to_string()));
            };
            let condition = match args[4].parse::<TriggerCondition>() {
                Ok(c) => c,
                Err(e) => return Ok(AppCommand::Unknown(e.to_string())),
            };
            let threshold = match args[5].parse::<f64>() {
                Ok(t) if t.is_finite() && t >= 0.0 => t,
                _ => return Ok(AppCommand::Unknown(format!("阈值无效: {}", args[5]))),
            };
            let method = match args.get(6).map(|m| m.parse::<NotificationMethod>()) {
                None => NotificationMethod::Telegram,
                Some(Ok(m)) => m,
                Some(Err(e)) => return Ok(AppCommand::Unknown(e.to_string())),
            };
            Ok(AppCommand::AlertAdd {
                user_id,
                station_id,
                pollutant: args[3].to_string(),
                condition,
                threshold,
                method,
            })
        }
        Some("off") => match args.get(1).and_then(|s| s.parse::<i32>().ok()) {
            Some(alert_id) => Ok(AppCommand::AlertOff { alert_id }),
            None => Ok(AppCommand::Unknown("用法: alert off <alert_id>".to_string())),
        },
        _ => Ok(AppCommand::Unknown(
            "用法: alert add ... | alert off <alert_id>".to_string(),
        )),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn canonical_role(s: &str) -> Option<&'static str> {
    ["Citizen", "Researcher", "Administrator"]
        .into_iter()
        .find(|r| r.eq_ignore_ascii_case(s))
}

pub fn is_valid_email(s: &str) -> bool {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}
