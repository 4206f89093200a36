//! One reconciliation pass: read, check liveness, plan, gate, apply, report.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ioc_core::{
    get_host_os, read_hutch_config, read_status_dir, remove_status_file, Config, HostClassifier,
    HutchPolicy, IocStatusFile, Paths, Placement, ReconcileSettings,
};
use ioc_procserv::ProcServError;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::executor::SupervisorOps;
use crate::gate::{authorize, GateDecision};
use crate::plan::{plan, ObservedIoc, PlanContext, PlannedAction, ReconfigureKind};
use crate::report::{ActionOutcome, ActionReport, PassReport};

/// Actions are applied in waves; every session of one wave finishes before
/// the next wave starts, so an endpoint freed by a stop is free before
/// anything is launched on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stop,
    Start,
    Restart,
}

impl Phase {
    const ORDER: [Phase; 3] = [Phase::Stop, Phase::Start, Phase::Restart];

    fn covers(self, action: &PlannedAction) -> bool {
        matches!(
            (self, action),
            (Phase::Stop, PlannedAction::Stop { .. })
                | (
                    Phase::Stop | Phase::Start,
                    PlannedAction::Reconfigure {
                        kind: ReconfigureKind::Move,
                        ..
                    }
                )
                | (Phase::Start, PlannedAction::Start { .. })
                | (
                    Phase::Restart,
                    PlannedAction::Reconfigure {
                        kind: ReconfigureKind::PathOnly,
                        ..
                    }
                )
        )
    }

    fn label(self) -> &'static str {
        match self {
            Phase::Stop => "stop",
            Phase::Start => "start",
            Phase::Restart => "restart",
        }
    }
}

/// One planned action on its way to a report. `outcome` stays `None` while
/// every step so far has succeeded.
struct Slot {
    action: PlannedAction,
    outcome: Option<ActionOutcome>,
    at: DateTime<Utc>,
}

pub struct Orchestrator<O: SupervisorOps> {
    paths: Paths,
    settings: ReconcileSettings,
    ops: O,
}

impl<O: SupervisorOps> Orchestrator<O> {
    pub fn new(paths: Paths, settings: ReconcileSettings, ops: O) -> Self {
        Self {
            paths,
            settings,
            ops,
        }
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Bring `hutch` in line with its config on behalf of `user`.
    ///
    /// Only failing to read the config or the status directory aborts the
    /// pass; every per-IOC problem is reported in the result.
    pub fn run_pass(&self, hutch: &str, user: &str) -> Result<PassReport> {
        let started_at = Utc::now();
        let config = read_hutch_config(&self.paths, hutch)
            .with_context(|| format!("failed to read config for hutch {hutch}"))?;
        let statuses = read_status_dir(&self.paths, hutch)
            .with_context(|| format!("failed to read status directory for hutch {hutch}"))?;

        let observed = self.observe(&config, statuses, started_at);
        let actions = plan(
            &config,
            &observed,
            PlanContext {
                now: started_at,
                recent_crash_window: self.settings.recent_crash_window(),
            },
        );
        info!(hutch, user, planned = actions.len(), "reconciliation planned");

        let policy = HutchPolicy::load(&self.paths, hutch);
        let mut hosts = HostClassifier::default();
        hosts.add_hutch(hutch, &config);
        for (host, os) in get_host_os(&self.paths, actions.iter().map(PlannedAction::host)) {
            hosts.set_os(host, os);
        }

        let mut slots: Vec<Slot> = actions
            .into_iter()
            .map(|action| {
                if !hosts.in_hutch(action.host(), hutch) {
                    warn!(hutch, ioc = action.name(), host = action.host(), "acting on host outside hutch");
                }
                let outcome = match authorize(&policy, user, &action) {
                    GateDecision::Allowed => None,
                    GateDecision::Denied { reason } => {
                        warn!(hutch, user, ioc = action.name(), "action denied");
                        Some(ActionOutcome::Denied { reason })
                    }
                };
                Slot {
                    action,
                    outcome,
                    at: Utc::now(),
                }
            })
            .collect();

        for phase in Phase::ORDER {
            self.apply_phase(hutch, phase, &mut slots);
        }

        let reports = slots
            .into_iter()
            .map(|slot| {
                let outcome = slot.outcome.unwrap_or_else(|| {
                    info!(hutch, ioc = slot.action.name(), kind = slot.action.kind(), "action applied");
                    ActionOutcome::Applied
                });
                ActionReport {
                    host_os: hosts.os(slot.action.host()).map(str::to_string),
                    action: slot.action,
                    outcome,
                    at: slot.at,
                }
            })
            .collect();

        let report = PassReport {
            hutch: hutch.to_string(),
            user: user.to_string(),
            started_at,
            finished_at: Utc::now(),
            actions: reports,
        };
        info!(
            hutch,
            applied = report.applied(),
            denied = report.denied(),
            failed = report.failed(),
            "reconciliation finished"
        );
        Ok(report)
    }

    /// Check status records against their supervisors, and look for enabled
    /// IOCs that are up at their configured endpoint without a record.
    fn observe(
        &self,
        config: &Config,
        statuses: Vec<IocStatusFile>,
        now: DateTime<Utc>,
    ) -> Vec<ObservedIoc> {
        if !self.settings.probe_liveness {
            return statuses.into_iter().map(ObservedIoc::unprobed).collect();
        }

        let listed: BTreeSet<&str> = statuses.iter().map(|status| status.name.as_str()).collect();
        let claimed: BTreeSet<Placement> = statuses.iter().map(IocStatusFile::placement).collect();
        let unlisted: Vec<IocStatusFile> = config
            .procs()
            .values()
            .filter(|proc| !proc.hard && !proc.disable)
            .filter(|proc| !listed.contains(proc.name.as_str()))
            .filter(|proc| !claimed.contains(&proc.placement()))
            .map(|proc| IocStatusFile {
                name: proc.name.clone(),
                host: proc.host.clone(),
                port: proc.port,
                path: proc.path.clone(),
                pid: 0,
                mtime: now,
            })
            .collect();

        let candidates: Vec<(IocStatusFile, bool)> = statuses
            .into_iter()
            .map(|status| (status, true))
            .chain(unlisted.into_iter().map(|status| (status, false)))
            .collect();
        let endpoints: Vec<Placement> = candidates
            .iter()
            .map(|(status, _)| status.placement())
            .collect();
        let answers = run_bounded(endpoints, self.settings.max_parallel_sessions, |endpoint| {
            self.ops.is_running(&endpoint)
        });

        candidates
            .into_iter()
            .zip(answers)
            .filter_map(|((status, on_file), answer)| match answer {
                Ok(running) if on_file => {
                    debug!(ioc = %status.name, endpoint = %status.placement(), running, "liveness checked");
                    Some(ObservedIoc::probed(status, running))
                }
                Ok(true) => {
                    info!(ioc = %status.name, endpoint = %status.placement(), "found running ioc without a status file");
                    Some(ObservedIoc::probed(status, true))
                }
                Ok(false) => None,
                Err(message) => {
                    warn!(ioc = %status.name, endpoint = %status.placement(), panic = %message, "liveness check panicked");
                    on_file.then(|| ObservedIoc::unprobed(status))
                }
            })
            .collect()
    }

    /// Run this phase's step of every still-healthy action, in parallel.
    fn apply_phase(&self, hutch: &str, phase: Phase, slots: &mut [Slot]) {
        let due: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.outcome.is_none() && phase.covers(&slot.action))
            .map(|(index, _)| index)
            .collect();
        if due.is_empty() {
            return;
        }
        debug!(hutch, phase = phase.label(), sessions = due.len(), "applying phase");

        let results = run_bounded(due.clone(), self.settings.max_parallel_sessions, |index| {
            self.step(hutch, &slots[index].action, phase)
        });

        for (index, result) in due.into_iter().zip(results) {
            let slot = &mut slots[index];
            slot.at = Utc::now();
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(message) => format!("session panicked: {message}"),
            };
            error!(
                hutch,
                ioc = slot.action.name(),
                kind = slot.action.kind(),
                phase = phase.label(),
                error = %error,
                "action failed"
            );
            slot.outcome = Some(ActionOutcome::Failed { error });
        }
    }

    fn step(&self, hutch: &str, action: &PlannedAction, phase: Phase) -> Result<(), ProcServError> {
        match (phase, action) {
            (Phase::Stop, PlannedAction::Stop { name, endpoint, .. }) => {
                self.stop(hutch, name, endpoint)
            }
            (Phase::Stop, PlannedAction::Reconfigure { running, .. }) => {
                self.stop(hutch, &running.name, &running.placement())
            }
            (Phase::Start, PlannedAction::Start { proc } | PlannedAction::Reconfigure { proc, .. }) => {
                self.ops.start(hutch, proc)
            }
            (Phase::Restart, PlannedAction::Reconfigure { running, .. }) => {
                self.ops.restart(&running.placement())
            }
            _ => Ok(()),
        }
    }

    fn stop(&self, hutch: &str, name: &str, endpoint: &Placement) -> Result<(), ProcServError> {
        self.ops.stop(endpoint)?;
        remove_status_file(&self.paths, hutch, name);
        Ok(())
    }
}

/// Map `items` through `work` on at most `limit` threads, keeping input order.
///
/// An item whose `work` panics yields `Err` with the panic message; the
/// other items still run.
fn run_bounded<T, R, F>(items: Vec<T>, limit: usize, work: F) -> Vec<Result<R, String>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let guarded = |item: T| panic::catch_unwind(AssertUnwindSafe(|| work(item))).map_err(panic_message);

    let total = items.len();
    let workers = limit.max(1).min(total);
    if workers <= 1 {
        return items.into_iter().map(guarded).collect();
    }

    let queue = Mutex::new(items.into_iter().enumerate());
    let next = || {
        queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .next()
    };

    let mut done: Vec<(usize, Result<R, String>)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut out = Vec::new();
                    while let Some((index, item)) = next() {
                        out.push((index, guarded(item)));
                    }
                    out
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(out) => out,
                Err(payload) => panic::resume_unwind(payload),
            })
            .collect()
    });

    done.sort_by_key(|(index, _)| *index);
    done.into_iter().map(|(_, result)| result).collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
