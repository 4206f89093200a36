//! Drift detection between a hutch config and what its supervisors report.

use chrono::{DateTime, Utc};
use ioc_core::{Config, IocProc, IocStatusFile, Placement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A status-directory record plus what a liveness probe said about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedIoc {
    pub status: IocStatusFile,
    /// `None` when no probe was made; the record is then taken at its word.
    pub running: Option<bool>,
}

impl ObservedIoc {
    pub fn unprobed(status: IocStatusFile) -> Self {
        Self {
            status,
            running: None,
        }
    }

    pub fn probed(status: IocStatusFile, running: bool) -> Self {
        Self {
            status,
            running: Some(running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running != Some(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NotConfigured,
    Disabled,
    /// Disabled, reported down, but its status file is fresh enough that
    /// procServ may still bring it back.
    RecentlyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconfigureKind {
    /// Different host or port: stop the old instance, start the new one.
    Move,
    /// Same endpoint, different release: restart in place.
    PathOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Start {
        proc: IocProc,
    },
    Stop {
        name: String,
        endpoint: Placement,
        reason: StopReason,
    },
    Reconfigure {
        proc: IocProc,
        running: IocStatusFile,
        kind: ReconfigureKind,
    },
}

impl PlannedAction {
    pub fn name(&self) -> &str {
        match self {
            Self::Start { proc } | Self::Reconfigure { proc, .. } => &proc.name,
            Self::Stop { name, .. } => name,
        }
    }

    /// Host the action ends up acting on.
    pub fn host(&self) -> &str {
        match self {
            Self::Start { proc } | Self::Reconfigure { proc, .. } => &proc.host,
            Self::Stop { endpoint, .. } => &endpoint.host,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Reconfigure {
                kind: ReconfigureKind::Move,
                ..
            } => "move",
            Self::Reconfigure {
                kind: ReconfigureKind::PathOnly,
                ..
            } => "restart",
        }
    }
}

/// Inputs that are not part of the config or the status directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanContext {
    pub now: DateTime<Utc>,
    pub recent_crash_window: Duration,
}

/// Corrective actions that bring `observed` in line with `config`, in name order.
///
/// Hard IOCs are never planned against.
pub fn plan(config: &Config, observed: &[ObservedIoc], ctx: PlanContext) -> Vec<PlannedAction> {
    let by_name: BTreeMap<&str, &ObservedIoc> = observed
        .iter()
        .map(|entry| (entry.status.name.as_str(), entry))
        .collect();

    let mut actions = BTreeMap::<String, PlannedAction>::new();

    for proc in config.procs().values() {
        if proc.hard {
            continue;
        }
        let seen = by_name.get(proc.name.as_str()).copied();

        if proc.disable {
            let action = match seen {
                Some(entry) if entry.is_running() => Some(StopReason::Disabled),
                Some(entry) if is_recent(&entry.status, ctx) => Some(StopReason::RecentlyRunning),
                _ => None,
            };
            if let (Some(reason), Some(entry)) = (action, seen) {
                actions.insert(
                    proc.name.clone(),
                    PlannedAction::Stop {
                        name: proc.name.clone(),
                        endpoint: entry.status.placement(),
                        reason,
                    },
                );
            }
            continue;
        }

        let action = match seen.filter(|entry| entry.is_running()) {
            None => Some(PlannedAction::Start { proc: proc.clone() }),
            Some(entry) if entry.status.placement() != proc.placement() => {
                Some(PlannedAction::Reconfigure {
                    proc: proc.clone(),
                    running: entry.status.clone(),
                    kind: ReconfigureKind::Move,
                })
            }
            Some(entry) if entry.status.path != proc.path => Some(PlannedAction::Reconfigure {
                proc: proc.clone(),
                running: entry.status.clone(),
                kind: ReconfigureKind::PathOnly,
            }),
            Some(_) => None,
        };
        if let Some(action) = action {
            actions.insert(proc.name.clone(), action);
        }
    }

    for entry in observed {
        if config.contains(&entry.status.name) || !entry.is_running() {
            continue;
        }
        actions.insert(
            entry.status.name.clone(),
            PlannedAction::Stop {
                name: entry.status.name.clone(),
                endpoint: entry.status.placement(),
                reason: StopReason::NotConfigured,
            },
        );
    }

    actions.into_values().collect()
}

fn is_recent(status: &IocStatusFile, ctx: PlanContext) -> bool {
    let age = ctx.now.signed_duration_since(status.mtime);
    age.to_std()
        .map(|age| age < ctx.recent_crash_window)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    fn ctx() -> PlanContext {
        PlanContext {
            now: now(),
            recent_crash_window: Duration::from_secs(600),
        }
    }

    fn status(name: &str, host: &str, port: u16, path: &str, age_secs: i64) -> IocStatusFile {
        IocStatusFile {
            name: name.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            pid: 1234,
            mtime: now() - chrono::Duration::seconds(age_secs),
        }
    }

    fn config(procs: Vec<IocProc>) -> Config {
        let mut config = Config::new();
        for proc in procs {
            config.add_proc(proc).expect("add proc");
        }
        config
    }

    #[test]
    fn in_sync_hutch_plans_nothing() {
        let config = config(vec![IocProc::new("ioc-a", "h1", 30001, "ioc/a")]);
        let observed = [ObservedIoc::unprobed(status("ioc-a", "h1", 30001, "ioc/a", 5))];
        assert!(plan(&config, &observed, ctx()).is_empty());
    }

    #[test]
    fn classifies_each_drift_kind() {
        let config = config(vec![
            IocProc::new("ioc-missing", "h1", 30001, "ioc/missing"),
            IocProc::new("ioc-moved", "h2", 30002, "ioc/moved"),
            IocProc::new("ioc-upgraded", "h1", 30003, "ioc/upgraded/R2"),
        ]);
        let observed = [
            ObservedIoc::unprobed(status("ioc-moved", "h1", 30002, "ioc/moved", 5)),
            ObservedIoc::unprobed(status("ioc-upgraded", "h1", 30003, "ioc/upgraded/R1", 5)),
            ObservedIoc::unprobed(status("ioc-stray", "h3", 30009, "ioc/stray", 5)),
        ];

        let actions = plan(&config, &observed, ctx());
        let kinds: Vec<(&str, &str)> = actions
            .iter()
            .map(|action| (action.name(), action.kind()))
            .collect();
        assert_eq!(
            kinds,
            [
                ("ioc-missing", "start"),
                ("ioc-moved", "move"),
                ("ioc-stray", "stop"),
                ("ioc-upgraded", "restart"),
            ]
        );

        let PlannedAction::Stop { endpoint, reason, .. } = &actions[2] else {
            panic!("expected stop");
        };
        assert_eq!(endpoint.to_string(), "h3:30009");
        assert_eq!(*reason, StopReason::NotConfigured);
        assert_eq!(actions[1].host(), "h2");
    }

    #[test]
    fn hard_iocs_are_never_touched() {
        let config = config(vec![
            IocProc::new("ioc-hard", "h1", 0, "ioc/hard").hard(true),
            IocProc::new("ioc-hard-moved", "h2", 0, "ioc/hard").hard(true),
        ]);
        let observed = [ObservedIoc::unprobed(status(
            "ioc-hard-moved",
            "h1",
            30001,
            "ioc/other",
            5,
        ))];
        assert!(plan(&config, &observed, ctx()).is_empty());
    }

    #[test]
    fn disabled_iocs_are_stopped_when_running() {
        let config = config(vec![
            IocProc::new("ioc-off", "h1", 30001, "ioc/off").disabled(true),
            IocProc::new("ioc-off-idle", "h1", 30002, "ioc/off").disabled(true),
        ]);
        let observed = [ObservedIoc::probed(status("ioc-off", "h1", 30001, "ioc/off", 5), true)];

        let actions = plan(&config, &observed, ctx());
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            PlannedAction::Stop { name, reason: StopReason::Disabled, .. } if name == "ioc-off"
        ));
    }

    #[test]
    fn disabled_and_recently_seen_is_stopped_again() {
        let config = config(vec![
            IocProc::new("ioc-fresh", "h1", 30001, "ioc/x").disabled(true),
            IocProc::new("ioc-stale", "h1", 30002, "ioc/y").disabled(true),
        ]);
        let observed = [
            ObservedIoc::probed(status("ioc-fresh", "h1", 30001, "ioc/x", 30), false),
            ObservedIoc::probed(status("ioc-stale", "h1", 30002, "ioc/y", 3600), false),
        ];

        let actions = plan(&config, &observed, ctx());
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            PlannedAction::Stop { name, reason: StopReason::RecentlyRunning, .. } if name == "ioc-fresh"
        ));
    }

    #[test]
    fn probed_down_iocs_count_as_not_running() {
        let config = config(vec![IocProc::new("ioc-a", "h1", 30001, "ioc/a")]);
        let observed = [
            ObservedIoc::probed(status("ioc-a", "h1", 30001, "ioc/a", 5), false),
            ObservedIoc::probed(status("ioc-gone", "h1", 30005, "ioc/gone", 5), false),
        ];

        let actions = plan(&config, &observed, ctx());
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], PlannedAction::Start { proc } if proc.name == "ioc-a"));
    }

    #[test]
    fn actions_serialize_with_tag() {
        let action = PlannedAction::Stop {
            name: "ioc-a".to_string(),
            endpoint: Placement {
                host: "h1".to_string(),
                port: 30001,
            },
            reason: StopReason::RecentlyRunning,
        };
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value["action"], "stop");
        assert_eq!(value["reason"], "recently_running");
        assert_eq!(value["endpoint"]["port"], 30001);
    }
}
