use chrono::{Local, NaiveTime};
use log::{debug, info, warn};
use parking_lot::Mutex;
use crate::config::TranscodeConfig;
use crate::error::DaemonError;

/// Daily active interval, closed-open `[start, stop)`.
///
/// When `start > stop` the interval crosses midnight. Equal bounds describe a
/// full day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityBounds {
    pub start: NaiveTime,
    pub stop: NaiveTime,
}

impl ActivityBounds {
    pub fn new(start: NaiveTime, stop: NaiveTime) -> Self {
        Self { start, stop }
    }

    /// Whether `now` falls inside the active interval
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start < self.stop {
            now >= self.start && now < self.stop
        } else {
            now >= self.start || now < self.stop
        }
    }
}

/// Snapshot of the activity bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityState {
    /// Time-based state, only changed by the transition checks
    pub is_active: bool,
    /// Operator override, wins over `is_active` while set
    pub forced: Option<bool>,
}

/// Shell commands fired on wake/sleep transitions
#[derive(Debug, Clone, Default)]
pub struct ActivityHooks {
    pub after_start: Option<String>,
    pub after_stop: Option<String>,
}

/// Tracks whether the scheduler may start new work.
pub struct ActivityWindow {
    bounds: Option<ActivityBounds>,
    hooks: ActivityHooks,
    state: Mutex<ActivityState>,
}

impl ActivityWindow {
    /// New window, initially active and not forced
    pub fn new(bounds: Option<ActivityBounds>, hooks: ActivityHooks) -> Self {
        Self {
            bounds,
            hooks,
            state: Mutex::new(ActivityState { is_active: true, forced: None }),
        }
    }

    pub fn from_config(cfg: &TranscodeConfig) -> Result<Self, DaemonError> {
        Ok(Self::new(
            cfg.activity_bounds()?,
            ActivityHooks {
                after_start: cfg.after_start.clone(),
                after_stop: cfg.after_stop.clone(),
            },
        ))
    }

    pub fn bounds(&self) -> Option<ActivityBounds> {
        self.bounds
    }

    pub fn state(&self) -> ActivityState {
        *self.state.lock()
    }

    /// Forced state if any, time-based state otherwise
    pub fn should_work(&self) -> bool {
        let state = self.state.lock();
        state.forced.unwrap_or(state.is_active)
    }

    pub fn set_forced_state(&self, forced: Option<bool>) {
        self.state.lock().forced = forced;
    }

    pub fn set_active(&self, active: bool) {
        self.state.lock().is_active = active;
    }

    /// Wake up if the current time entered the window. Returns true on transition.
    pub fn activate_if_needed(&self) -> bool {
        self.activate_if_needed_at(Local::now().time())
    }

    pub fn activate_if_needed_at(&self, now: NaiveTime) -> bool {
        let Some(bounds) = self.bounds else {
            return false;
        };

        let transitioned = {
            let mut state = self.state.lock();
            if !state.is_active && bounds.contains(now) {
                state.is_active = true;
                true
            } else {
                false
            }
        };

        if transitioned {
            info!("🔋 Leaving sleeping mode");
            run_hook("after-start", self.hooks.after_start.as_deref());
        }
        transitioned
    }

    /// Fall asleep if the current time left the window. Returns true on transition.
    pub fn disable_if_needed(&self) -> bool {
        self.disable_if_needed_at(Local::now().time())
    }

    pub fn disable_if_needed_at(&self, now: NaiveTime) -> bool {
        let Some(bounds) = self.bounds else {
            return false;
        };

        let transitioned = {
            let mut state = self.state.lock();
            if state.is_active && !bounds.contains(now) {
                state.is_active = false;
                true
            } else {
                false
            }
        };

        if transitioned {
            info!("💤 Entering sleeping mode");
            run_hook("after-stop", self.hooks.after_stop.as_deref());
        }
        transitioned
    }
}

/// Fire-and-forget a hook command through the platform shell.
///
/// The child is awaited on a spawned task, so the poll loop never blocks on it.
fn run_hook(label: &'static str, command: Option<&str>) {
    let Some(command) = command else {
        return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("Cannot run {} hook outside the async runtime: {}", label, command);
        return;
    };

    let mut cmd = if cfg!(windows) {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to start {} hook '{}': {}", label, command, e);
            return;
        }
    };
    debug!("Started {} hook (pid {}): {}", label, child.id().unwrap_or_default(), command);

    let command = command.to_string();
    runtime.spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => debug!("{} hook finished: {}", label, command),
            Ok(status) => warn!("⚠️  {} hook '{}' exited with {}", label, command, status),
            Err(e) => warn!("Failed to wait for {} hook '{}': {}", label, command, e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;
    use std::time::Duration;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Run the scheduler's per-cycle checks at `now` on a fresh window
    fn should_work_at(start: NaiveTime, stop: NaiveTime, now: NaiveTime) -> bool {
        let window = ActivityWindow::new(Some(ActivityBounds::new(start, stop)), ActivityHooks::default());
        window.disable_if_needed_at(now);
        window.activate_if_needed_at(now);
        window.should_work()
    }

    #[test]
    fn test_wraparound_window() {
        let (start, stop) = (t(23, 0), t(7, 0));
        assert!(should_work_at(start, stop, t(23, 30)));
        assert!(should_work_at(start, stop, t(3, 0)));
        assert!(should_work_at(start, stop, t(6, 59)));
        assert!(!should_work_at(start, stop, t(12, 0)));
    }

    #[test]
    fn test_daytime_window() {
        let (start, stop) = (t(8, 0), t(20, 0));
        assert!(should_work_at(start, stop, t(9, 0)));
        assert!(!should_work_at(start, stop, t(21, 0)));
    }

    #[test]
    fn test_boundaries_are_closed_open() {
        let day = ActivityBounds::new(t(8, 0), t(20, 0));
        assert!(day.contains(t(8, 0)));
        assert!(!day.contains(t(20, 0)));

        let night = ActivityBounds::new(t(23, 0), t(7, 0));
        assert!(night.contains(t(23, 0)));
        assert!(!night.contains(t(7, 0)));
        assert!(night.contains(t(0, 0)));
    }

    #[test]
    fn test_equal_bounds_cover_the_whole_day() {
        let bounds = ActivityBounds::new(t(6, 0), t(6, 0));
        assert!(bounds.contains(t(6, 0)));
        assert!(bounds.contains(t(5, 59)));
    }

    #[test]
    fn test_transitions_fire_once() {
        let window = ActivityWindow::new(Some(ActivityBounds::new(t(8, 0), t(20, 0))), ActivityHooks::default());
        assert!(!window.activate_if_needed_at(t(9, 0)), "already active");
        assert!(window.disable_if_needed_at(t(21, 0)));
        assert!(!window.disable_if_needed_at(t(22, 0)), "second disable is a no-op");
        assert!(!window.should_work());
        assert!(window.activate_if_needed_at(t(8, 0)));
        assert!(!window.activate_if_needed_at(t(8, 1)));
        assert!(window.should_work());
    }

    fn hook_runs(marker: &Path) -> usize {
        std::fs::read_to_string(marker).map(|s| s.lines().count()).unwrap_or(0)
    }

    async fn wait_for_runs(marker: &Path, runs: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hook_runs(marker) < runs {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("hook did not run in time");
    }

    fn counting_hooks(dir: &Path) -> ActivityHooks {
        ActivityHooks {
            after_start: Some(format!("echo start >> '{}'", dir.join("started").display())),
            after_stop: Some(format!("echo stop >> '{}'", dir.join("stopped").display())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hooks_fire_on_transitions_only() {
        let dir = tempfile::tempdir().unwrap();
        let (started, stopped) = (dir.path().join("started"), dir.path().join("stopped"));
        let window = ActivityWindow::new(Some(ActivityBounds::new(t(8, 0), t(20, 0))), counting_hooks(dir.path()));

        assert!(!window.activate_if_needed_at(t(9, 0)));
        assert!(window.disable_if_needed_at(t(21, 0)));
        assert!(!window.disable_if_needed_at(t(22, 0)));
        wait_for_runs(&stopped, 1).await;

        assert!(window.activate_if_needed_at(t(8, 0)));
        assert!(!window.activate_if_needed_at(t(8, 30)));
        assert!(!window.disable_if_needed_at(t(19, 59)));
        wait_for_runs(&started, 1).await;

        // Let any stray hook land before counting
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hook_runs(&started), 1);
        assert_eq!(hook_runs(&stopped), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unbounded_window_never_fires_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let window = ActivityWindow::new(None, counting_hooks(dir.path()));
        assert!(!window.disable_if_needed_at(t(3, 0)));
        assert!(!window.activate_if_needed_at(t(3, 0)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hook_runs(&dir.path().join("started")), 0);
        assert_eq!(hook_runs(&dir.path().join("stopped")), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_hook_keeps_the_transition() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let hooks = ActivityHooks {
            after_start: None,
            after_stop: Some(format!("echo ran >> '{}'; exit 3", marker.display())),
        };
        let window = ActivityWindow::new(Some(ActivityBounds::new(t(8, 0), t(20, 0))), hooks);

        assert!(window.disable_if_needed_at(t(21, 0)));
        wait_for_runs(&marker, 1).await;
        assert!(!window.should_work());
    }

    #[test]
    fn test_hooks_outside_runtime_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let window = ActivityWindow::new(Some(ActivityBounds::new(t(8, 0), t(20, 0))), counting_hooks(dir.path()));
        assert!(window.disable_if_needed_at(t(21, 0)));
        assert!(window.activate_if_needed_at(t(9, 0)));
        assert_eq!(hook_runs(&dir.path().join("stopped")), 0);
    }

    #[test]
    fn test_no_bounds_is_always_active() {
        let window = ActivityWindow::new(None, ActivityHooks::default());
        assert!(!window.disable_if_needed_at(t(3, 0)));
        assert!(!window.activate_if_needed_at(t(3, 0)));
        assert!(window.should_work());
    }

    #[test]
    fn test_forced_state_overrides_without_touching_bookkeeping() {
        let window = ActivityWindow::new(Some(ActivityBounds::new(t(8, 0), t(20, 0))), ActivityHooks::default());
        window.disable_if_needed_at(t(23, 0));
        assert!(!window.should_work());

        window.set_forced_state(Some(true));
        assert!(window.should_work());
        assert!(!window.state().is_active);

        // Time-based transitions keep running underneath the override
        assert!(window.activate_if_needed_at(t(9, 0)));
        window.set_forced_state(Some(false));
        assert!(!window.should_work());
        assert!(window.state().is_active);

        window.set_forced_state(None);
        assert!(window.should_work());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// After one disable/activate cycle the window agrees with interval membership,
        /// whatever state it started in.
        #[test]
        fn test_cycle_converges_to_membership(
            start in 0u32..1440,
            stop in 0u32..1440,
            now in 0u32..1440,
            initially_active in prop::bool::ANY,
        ) {
            let (start, stop, now) = (t(start / 60, start % 60), t(stop / 60, stop % 60), t(now / 60, now % 60));
            let bounds = ActivityBounds::new(start, stop);
            let window = ActivityWindow::new(Some(bounds), ActivityHooks::default());
            window.set_active(initially_active);

            let disabled = window.disable_if_needed_at(now);
            let activated = window.activate_if_needed_at(now);

            prop_assert!(!(disabled && activated), "only one transition per cycle");
            prop_assert_eq!(window.should_work(), bounds.contains(now));
        }

        #[test]
        fn test_wraparound_is_complement_of_inner_gap(
            start in 0u32..1440,
            stop in 0u32..1440,
            now in 0u32..1440,
        ) {
            prop_assume!(start != stop);
            let (s, e, n) = (t(start / 60, start % 60), t(stop / 60, stop % 60), t(now / 60, now % 60));
            let forward = ActivityBounds::new(s, e);
            let reverse = ActivityBounds::new(e, s);
            prop_assert_ne!(forward.contains(n), reverse.contains(n));
        }
    }
}
