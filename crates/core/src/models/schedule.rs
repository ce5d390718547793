use std::str::FromStr;

use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::errors::{BeehiveError, BeehiveResult};

fn default_star() -> String {
    "*".to_string()
}

/// crontab风格的调度说明，缺省字段等价于 `*`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrontabSpec {
    #[serde(default = "default_star")]
    pub minute: String,
    #[serde(default = "default_star")]
    pub hour: String,
    #[serde(default = "default_star")]
    pub day_of_week: String,
    #[serde(default = "default_star")]
    pub day_of_month: String,
    #[serde(default = "default_star")]
    pub month_of_year: String,
}

impl Default for CrontabSpec {
    fn default() -> Self {
        Self {
            minute: default_star(),
            hour: default_star(),
            day_of_week: default_star(),
            day_of_month: default_star(),
            month_of_year: default_star(),
        }
    }
}

impl CrontabSpec {
    /// 转换为cron crate的七段表达式（秒固定为0）
    pub fn to_cron_expression(&self) -> String {
        format!(
            "0 {} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }

    pub fn compile(&self) -> BeehiveResult<Schedule> {
        let expr = self.to_cron_expression();
        Schedule::from_str(&expr).map_err(|e| BeehiveError::InvalidCron {
            expr,
            message: e.to_string(),
        })
    }
}

/// 固定间隔的调度说明，各字段叠加成一个周期
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntervalSpec {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub weeks: u64,
}

impl IntervalSpec {
    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    pub fn period(&self) -> Duration {
        Duration::seconds(
            (self.weeks * 604_800
                + self.days * 86_400
                + self.hours * 3_600
                + self.minutes * 60
                + self.seconds) as i64,
        )
    }
}

/// 调度说明：crontab或固定间隔
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleSpec {
    Crontab(CrontabSpec),
    Interval(IntervalSpec),
}

impl ScheduleSpec {
    /// 校验说明本身是否合法，注册时调用
    pub fn validate(&self) -> BeehiveResult<()> {
        match self {
            ScheduleSpec::Crontab(spec) => {
                spec.compile()?;
                Ok(())
            }
            ScheduleSpec::Interval(spec) => {
                if spec.period() <= Duration::zero() {
                    return Err(BeehiveError::Configuration(
                        "调度间隔必须大于零".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// 判断从上次触发时间起，当前时刻是否到期
    ///
    /// 间隔型在 `relative=false` 时把下次触发时间对齐到周期内最大的
    /// 自然时间单位边界（小时间隔对齐整点，天/周间隔对齐零点）。
    pub fn is_due(
        &self,
        last_run: DateTime<Utc>,
        now: DateTime<Utc>,
        relative: bool,
    ) -> BeehiveResult<bool> {
        self.next_run_after(last_run, relative)
            .map(|next| next.map(|t| t <= now).unwrap_or(false))
    }

    /// 上次触发之后的下一次预期触发时间
    pub fn next_run_after(
        &self,
        last_run: DateTime<Utc>,
        relative: bool,
    ) -> BeehiveResult<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::Crontab(spec) => {
                let schedule = spec.compile()?;
                Ok(schedule.after(&last_run).next())
            }
            ScheduleSpec::Interval(spec) => {
                let next = last_run + spec.period();
                if relative {
                    Ok(Some(next))
                } else {
                    Ok(Some(round_to_unit_boundary(next, spec.period())))
                }
            }
        }
    }
}

/// 把时间戳向下取整到间隔周期的自然单位边界
fn round_to_unit_boundary(t: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let secs = period.num_seconds();
    if secs <= 0 {
        return t;
    }
    if secs % 86_400 == 0 {
        // 天/周级别间隔对齐到当日零点
        t.date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(t)
    } else if secs % 3_600 == 0 {
        t.with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(t)
    } else if secs % 60 == 0 {
        t.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(t)
    } else {
        t
    }
}

/// 任务提交附加选项
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitOptions {
    /// 目标队列，缺省使用系统任务队列
    pub queue: Option<String>,
}

/// 具名的周期性调度条目
///
/// 除 `last_run_at` 与 `total_run_count` 仅由Beat在成功触发后更新外，
/// 条目不可变；按名称幂等注册。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub task: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub options: SubmitOptions,
    pub spec: ScheduleSpec,
    /// 间隔相位锚定到进程启动（true）还是对齐自然边界（false，默认）
    pub relative: bool,
    pub last_run_at: DateTime<Utc>,
    pub total_run_count: u64,
}

impl ScheduleEntry {
    pub fn new(
        name: String,
        task: String,
        spec: ScheduleSpec,
        args: serde_json::Value,
        kwargs: serde_json::Value,
        options: SubmitOptions,
        relative: bool,
    ) -> Self {
        Self {
            name,
            task,
            args,
            kwargs,
            options,
            spec,
            relative,
            last_run_at: Utc::now(),
            total_run_count: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> BeehiveResult<bool> {
        self.spec.is_due(self.last_run_at, now, self.relative)
    }

    /// 两个条目的定义部分（不含运行期字段）是否一致
    pub fn same_definition(&self, other: &ScheduleEntry) -> bool {
        self.task == other.task
            && self.args == other.args
            && self.kwargs == other.kwargs
            && self.options == other.options
            && self.spec == other.spec
            && self.relative == other.relative
    }

    /// 成功触发后由Beat调用
    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_run_at = now;
        self.total_run_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_crontab_defaults_to_every() {
        let spec = CrontabSpec::default();
        assert_eq!(spec.to_cron_expression(), "0 * * * * *");
        spec.compile().expect("default crontab compiles");
    }

    #[test]
    fn test_crontab_nightly_at_four() {
        let spec = ScheduleSpec::Crontab(CrontabSpec {
            minute: "0".to_string(),
            hour: "4".to_string(),
            ..Default::default()
        });
        let last_run = utc(2024, 3, 1, 12, 0, 0);

        // 凌晨4点前不到期
        assert!(!spec.is_due(last_run, utc(2024, 3, 2, 3, 59, 0), false).unwrap());
        // 过了4点整到期
        assert!(spec.is_due(last_run, utc(2024, 3, 2, 4, 0, 30), false).unwrap());
    }

    #[test]
    fn test_invalid_crontab_rejected() {
        let spec = ScheduleSpec::Crontab(CrontabSpec {
            minute: "not-a-minute".to_string(),
            ..Default::default()
        });
        assert!(matches!(
            spec.validate(),
            Err(BeehiveError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_interval_relative_anchors_to_last_run() {
        let spec = ScheduleSpec::Interval(IntervalSpec {
            hours: 1,
            ..Default::default()
        });
        let last_run = utc(2024, 3, 1, 10, 30, 0);

        assert!(!spec.is_due(last_run, utc(2024, 3, 1, 11, 29, 59), true).unwrap());
        assert!(spec.is_due(last_run, utc(2024, 3, 1, 11, 30, 0), true).unwrap());
    }

    #[test]
    fn test_interval_rounds_to_hour_boundary() {
        let spec = ScheduleSpec::Interval(IntervalSpec {
            hours: 1,
            ..Default::default()
        });
        let last_run = utc(2024, 3, 1, 10, 30, 0);

        // 对齐到整点: 11:30 向下取整为 11:00
        let next = spec.next_run_after(last_run, false).unwrap().unwrap();
        assert_eq!(next, utc(2024, 3, 1, 11, 0, 0));
        assert!(spec.is_due(last_run, utc(2024, 3, 1, 11, 0, 0), false).unwrap());
    }

    #[test]
    fn test_interval_daily_rounds_to_midnight() {
        let spec = ScheduleSpec::Interval(IntervalSpec {
            days: 1,
            ..Default::default()
        });
        let last_run = utc(2024, 3, 1, 15, 45, 0);
        let next = spec.next_run_after(last_run, false).unwrap().unwrap();
        assert_eq!(next, utc(2024, 3, 2, 0, 0, 0));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let spec = ScheduleSpec::Interval(IntervalSpec::default());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_entry_mark_fired() {
        let mut entry = ScheduleEntry::new(
            "cleanup".to_string(),
            "nightly_cleanup".to_string(),
            ScheduleSpec::Interval(IntervalSpec::from_seconds(60)),
            serde_json::json!([]),
            serde_json::json!({}),
            SubmitOptions::default(),
            true,
        );
        assert_eq!(entry.total_run_count, 0);

        let fired_at = utc(2024, 3, 1, 0, 1, 0);
        entry.mark_fired(fired_at);
        assert_eq!(entry.total_run_count, 1);
        assert_eq!(entry.last_run_at, fired_at);
    }

    #[test]
    fn test_same_definition_ignores_runtime_fields() {
        let make = || {
            ScheduleEntry::new(
                "cleanup".to_string(),
                "nightly_cleanup".to_string(),
                ScheduleSpec::Interval(IntervalSpec::from_seconds(60)),
                serde_json::json!([]),
                serde_json::json!({}),
                SubmitOptions::default(),
                false,
            )
        };
        let a = make();
        let mut b = make();
        b.mark_fired(Utc::now());
        assert!(a.same_definition(&b));

        b.task = "other".to_string();
        assert!(!a.same_definition(&b));
    }
}
