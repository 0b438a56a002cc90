//! 同步调度 - 每分钟评估同步规则，按间隔或星期/时间表触发
//!
//! 规则评估与同步执行解耦：到期的规则在独立任务中执行，
//! 单个长时同步不会阻塞其他规则的评估。

use chrono::{DateTime, Datelike, Local, NaiveDateTime, Utc, Weekday};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{parse_hhmm, ConfigStore, ScheduleType, SyncRule};
use crate::core::sync::SyncEngine;

/// 规则评估周期
const EVALUATION_INTERVAL: Duration = Duration::from_secs(60);

/// 计划时间过后允许立即触发的窗口（分钟）
const SCHEDULE_WINDOW_MINUTES: i64 = 5;

/// 同步规则的后台评估循环
pub struct SyncScheduler {
    config: Arc<ConfigStore>,
    engine: Arc<SyncEngine>,
    running: Arc<AtomicBool>,
    /// 每条规则最近一次触发时间的内存缓存，避免同一评估周期内重复触发
    last_sync: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SyncScheduler {
    pub fn new(config: Arc<ConfigStore>, engine: Arc<SyncEngine>) -> Self {
        Self {
            config,
            engine,
            running: Arc::new(AtomicBool::new(false)),
            last_sync: Mutex::new(HashMap::new()),
        }
    }

    /// 启动评估循环
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("同步调度已在运行");
            return;
        }

        self.engine.resume();
        info!("同步调度已启动");

        tokio::spawn(async move {
            while self.running.load(Ordering::SeqCst) {
                self.evaluate_rules();
                tokio::time::sleep(EVALUATION_INTERVAL).await;
            }
            info!("同步调度循环退出");
        });
    }

    /// 停止评估循环并请求中断进行中的同步（尽力而为）
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.engine.stop();
            info!("同步调度已停止");
        }
    }

    /// 评估全部规则，到期的在后台启动同步
    fn evaluate_rules(&self) {
        let rules = self.config.sync_rules();
        let now = Utc::now();
        let now_local = Local::now().naive_local();

        for (index, rule) in rules.iter().enumerate() {
            if !rule.enabled {
                continue;
            }

            let last = {
                let cache = self.last_sync.lock().unwrap();
                cache.get(&rule.name).copied()
            }
            .or(rule.last_sync);

            if !rule_due(rule, last, now, now_local) {
                continue;
            }

            // 先记录触发时间再启动，防止下个评估周期重复触发
            self.last_sync.lock().unwrap().insert(rule.name.clone(), now);
            if let Err(e) = self.config.set_sync_rule_last_sync(index, now) {
                warn!("保存规则 '{}' 的 last_sync 失败: {}", rule.name, e);
            }

            info!("规则 '{}' 到期，启动同步", rule.name);
            let engine = self.engine.clone();
            let rule = rule.clone();
            tokio::spawn(async move {
                engine.sync_rule(&rule).await;
            });
        }
    }

    /// 立即同步指定规则（手动触发，不更新 last_sync）
    pub fn run_sync_now(&self, rule_index: usize) -> bool {
        let rules = self.config.sync_rules();
        match rules.get(rule_index) {
            Some(rule) => {
                info!("手动触发同步: {}", rule.name);
                let engine = self.engine.clone();
                let rule = rule.clone();
                tokio::spawn(async move {
                    engine.sync_rule(&rule).await;
                });
                true
            }
            None => {
                error!("同步规则索引越界: {}", rule_index);
                false
            }
        }
    }
}

/// 判断规则现在是否到期
pub fn rule_due(
    rule: &SyncRule,
    last_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    now_local: NaiveDateTime,
) -> bool {
    match rule.schedule_type {
        ScheduleType::Interval => match last_sync {
            None => true,
            Some(last) => {
                let elapsed_minutes = (now - last).num_seconds() as f64 / 60.0;
                elapsed_minutes >= rule.interval_minutes as f64
            }
        },
        ScheduleType::Schedule => schedule_due(rule, last_sync, now_local),
    }
}

/// 判断按星期/时间调度的规则是否到期：每天最多一次，且只在计划时间之后
fn schedule_due(rule: &SyncRule, last_sync: Option<DateTime<Utc>>, now_local: NaiveDateTime) -> bool {
    if rule.schedule_days.is_empty() {
        return false;
    }

    let today = weekday_token(now_local.weekday());
    if !rule.schedule_days.iter().any(|d| d == today) {
        return false;
    }

    let (hour, minute) = parse_hhmm(&rule.schedule_time).unwrap_or((3, 0));
    let scheduled_today = match now_local.date().and_hms_opt(hour, minute, 0) {
        Some(t) => t,
        None => return false,
    };

    if now_local < scheduled_today {
        return false;
    }

    // 启动窗口：计划时间已过去超过 5 分钟且该规则从未同步过时不触发，
    // 避免规则刚保存时因当前时间远在计划之后而立即执行
    let window_end = scheduled_today + chrono::Duration::minutes(SCHEDULE_WINDOW_MINUTES);
    if now_local > window_end && last_sync.is_none() {
        return false;
    }

    // 今天计划时间之后已经同步过则不再触发
    if let Some(last) = last_sync {
        let last_local = last.with_timezone(&Local).naive_local();
        if last_local >= scheduled_today {
            return false;
        }
    }

    true
}

fn weekday_token(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}
