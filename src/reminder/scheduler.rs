//! Due-date reminder scheduling.
//!
//! Every observed task list replaces the whole schedule: all armed timers are
//! cancelled, then one timer is armed per (task, offset) whose fire instant is
//! still ahead and which has not been shown yet this session. A fired key is
//! recorded before any alert goes out and is never armed again.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::clock::{Clock, TimerCallback, TimerHandle};
use super::notify::{Alert, AudioCue, Notifier, PermissionProvider};
use super::offset::{REMINDER_OFFSETS, ReminderOffset};
use crate::core::store::TaskObserver;
use crate::core::task::Task;

/// Identity of one reminder: which task, which offset.
///
/// The due date is deliberately not part of it, so moving a task's due date
/// does not bring back an offset that already fired.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReminderKey {
    pub task_id: Uuid,
    pub label: &'static str,
}

struct ArmedTimer {
    label: &'static str,
    fire_at: DateTime<Utc>,
    handle: Box<dyn TimerHandle>,
}

#[derive(Default)]
struct ScheduleState {
    armed: HashMap<Uuid, Vec<ArmedTimer>>,
    shown: HashSet<ReminderKey>,
    // Bumped on every recompute; callbacks from older rounds do nothing.
    round: u64,
    disposed: bool,
    system_alerts: bool,
}

impl ScheduleState {
    fn cancel_all(&mut self) {
        for (_, timers) in self.armed.drain() {
            for timer in timers {
                timer.handle.cancel();
            }
        }
    }
}

/// Where a firing is delivered. Each armed timer holds a clone.
#[derive(Clone)]
struct Channels {
    in_app: Arc<dyn Notifier>,
    system: Option<Arc<dyn Notifier>>,
    audio: Option<Arc<dyn AudioCue>>,
}

pub struct ReminderScheduler {
    clock: Arc<dyn Clock>,
    channels: Channels,
    permission: Option<Box<dyn PermissionProvider>>,
    state: Arc<Mutex<ScheduleState>>,
}

impl ReminderScheduler {
    /// A scheduler that only raises in-app alerts.
    pub fn new(clock: Arc<dyn Clock>, in_app: Box<dyn Notifier>) -> Self {
        Self {
            clock,
            channels: Channels {
                in_app: Arc::from(in_app),
                system: None,
                audio: None,
            },
            permission: None,
            state: Arc::new(Mutex::new(ScheduleState::default())),
        }
    }

    /// Add an out-of-app channel, gated by `permission`.
    pub fn with_system_alerts(
        mut self,
        system: Box<dyn Notifier>,
        permission: Box<dyn PermissionProvider>,
    ) -> Self {
        self.channels.system = Some(Arc::from(system));
        self.permission = Some(permission);
        self
    }

    pub fn with_audio(mut self, audio: Box<dyn AudioCue>) -> Self {
        self.channels.audio = Some(Arc::from(audio));
        self
    }

    /// Ask for permission to raise system alerts. In-app alerts fire either way.
    ///
    /// Without a permission provider the answer is an immediate `false`.
    pub async fn request_permission(&self) -> bool {
        let granted = match &self.permission {
            Some(provider) => provider.request().await,
            None => false,
        };
        self.lock().system_alerts = granted;
        log::info!(
            "System reminder alerts {}",
            if granted { "allowed" } else { "not allowed" }
        );
        granted
    }

    /// Recompute the whole schedule from `tasks`.
    pub fn observe(&self, tasks: &[Task]) {
        let mut state = self.lock();
        if state.disposed {
            log::debug!("Ignoring task list after scheduler disposal");
            return;
        }

        state.cancel_all();
        state.round += 1;
        let round = state.round;
        let now = self.clock.now();

        for task in tasks {
            if task.completed {
                continue;
            }
            let Some(due) = task.due else {
                continue;
            };

            let mut timers = Vec::new();
            for offset in &REMINDER_OFFSETS {
                let Some(fire_at) = offset.fire_at(due) else {
                    log::debug!("Task {} due date out of range for '{}'", task.id, offset.label);
                    continue;
                };
                if fire_at <= now {
                    continue;
                }
                let key = ReminderKey {
                    task_id: task.id,
                    label: offset.label,
                };
                if state.shown.contains(&key) {
                    continue;
                }
                let Ok(delay) = (fire_at - now).to_std() else {
                    continue;
                };

                let callback = self.fire_callback(round, key, *offset, task.title.clone());
                let handle = self.clock.schedule(delay, callback);
                timers.push(ArmedTimer {
                    label: offset.label,
                    fire_at,
                    handle,
                });
            }

            if !timers.is_empty() {
                log::debug!("Armed {} reminders for task {}", timers.len(), task.id);
                state.armed.insert(task.id, timers);
            }
        }
    }

    fn fire_callback(
        &self,
        round: u64,
        key: ReminderKey,
        offset: ReminderOffset,
        title: String,
    ) -> TimerCallback {
        let state = Arc::clone(&self.state);
        let channels = self.channels.clone();
        Box::new(move || {
            let system_alerts = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.disposed || state.round != round {
                    return;
                }
                if !state.shown.insert(key.clone()) {
                    return;
                }
                if let Some(timers) = state.armed.get_mut(&key.task_id) {
                    timers.retain(|t| t.label != key.label);
                    if timers.is_empty() {
                        state.armed.remove(&key.task_id);
                    }
                }
                state.system_alerts
            };

            let alert = Alert {
                title: offset.label.to_string(),
                body: format!("Task: {}", title),
                urgent: offset.is_urgent(),
            };
            log::info!("Reminder '{}' for task {}", offset.label, key.task_id);
            deliver(&channels, &alert, system_alerts);
        })
    }

    /// Cancel every armed timer. Later `observe` calls do nothing.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.cancel_all();
        log::debug!("Reminder scheduler disposed");
    }

    pub fn armed_count(&self) -> usize {
        self.lock().armed.values().map(Vec::len).sum()
    }

    /// Labels armed for a task, earliest fire instant first.
    pub fn armed_labels(&self, task_id: Uuid) -> Vec<&'static str> {
        let state = self.lock();
        let mut timers: Vec<(DateTime<Utc>, &'static str)> = state
            .armed
            .get(&task_id)
            .map(|ts| ts.iter().map(|t| (t.fire_at, t.label)).collect())
            .unwrap_or_default();
        timers.sort();
        timers.into_iter().map(|(_, label)| label).collect()
    }

    /// The next reminder to go off, if any.
    pub fn next_fire(&self) -> Option<(Uuid, &'static str, DateTime<Utc>)> {
        let state = self.lock();
        state
            .armed
            .iter()
            .flat_map(|(id, ts)| ts.iter().map(move |t| (*id, t.label, t.fire_at)))
            .min_by_key(|(_, _, at)| *at)
    }

    pub fn was_shown(&self, key: &ReminderKey) -> bool {
        self.lock().shown.contains(key)
    }

    fn lock(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(channels: &Channels, alert: &Alert, system_alerts: bool) {
    if let Some(audio) = &channels.audio {
        if let Err(e) = audio.play() {
            log::debug!("Reminder sound skipped: {}", e);
        }
    }
    if system_alerts {
        if let Some(system) = &channels.system {
            if let Err(e) = system.notify(alert) {
                log::warn!("System reminder alert failed: {}", e);
            }
        }
    }
    if let Err(e) = channels.in_app.notify(alert) {
        log::warn!("In-app reminder alert failed: {}", e);
    }
}

impl TaskObserver for ReminderScheduler {
    fn observe(&self, tasks: &[Task]) {
        ReminderScheduler::observe(self, tasks);
    }
}

impl Drop for ReminderScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reminder::clock::ManualClock;
    use crate::reminder::notify::{NotifyError, StaticPermission};
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Recorder {
        alerts: Arc<Mutex<Vec<Alert>>>,
    }

    impl Recorder {
        fn titles(&self) -> Vec<String> {
            self.alerts.lock().unwrap().iter().map(|a| a.title.clone()).collect()
        }

        fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    impl Notifier for Recorder {
        fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    struct Broken;

    impl Notifier for Broken {
        fn notify(&self, _: &Alert) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("test notifier"))
        }
    }

    impl AudioCue for Broken {
        fn play(&self) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("test audio"))
        }
    }

    #[derive(Clone, Default)]
    struct Beeps(Arc<AtomicUsize>);

    impl AudioCue for Beeps {
        fn play(&self) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 20, 9, 0, 0).unwrap()
    }

    fn setup() -> (ManualClock, Recorder, ReminderScheduler) {
        let clock = ManualClock::new(start());
        let recorder = Recorder::default();
        let scheduler = ReminderScheduler::new(Arc::new(clock.clone()), Box::new(recorder.clone()));
        (clock, recorder, scheduler)
    }

    fn report() -> Task {
        Task::new("Write report").with_due(start() + Duration::minutes(90))
    }

    #[test]
    fn arms_only_future_offsets() {
        let (clock, recorder, scheduler) = setup();
        let task = report();
        scheduler.observe(std::slice::from_ref(&task));

        assert_eq!(
            scheduler.armed_labels(task.id),
            vec!["1 hour before", "30 minutes before", "Deadline"]
        );
        assert_eq!(clock.pending(), 3);

        clock.advance(Duration::minutes(31));
        assert_eq!(recorder.titles(), vec!["1 hour before"]);
        let alert = recorder.alerts.lock().unwrap()[0].clone();
        assert!(alert.body.contains("Write report"));
        assert!(!alert.urgent);
        assert_eq!(scheduler.armed_labels(task.id), vec!["30 minutes before", "Deadline"]);
    }

    #[test]
    fn completing_cancels_remaining_reminders() {
        let (clock, recorder, scheduler) = setup();
        let mut task = report();
        scheduler.observe(std::slice::from_ref(&task));

        clock.advance(Duration::minutes(45));
        assert_eq!(recorder.count(), 1);

        task.completed = true;
        scheduler.observe(std::slice::from_ref(&task));
        assert_eq!(scheduler.armed_count(), 0);

        clock.advance(Duration::minutes(45));
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn repeated_observe_never_duplicates() {
        let (clock, recorder, scheduler) = setup();
        let task = report();
        let tasks = vec![task.clone()];

        scheduler.observe(&tasks);
        scheduler.observe(&tasks);
        assert_eq!(scheduler.armed_count(), 3);
        assert_eq!(clock.pending(), 3);

        clock.advance(Duration::minutes(31));
        for _ in 0..5 {
            scheduler.observe(&tasks);
        }
        assert_eq!(scheduler.armed_labels(task.id), vec!["30 minutes before", "Deadline"]);

        clock.advance(Duration::hours(2));
        scheduler.observe(&tasks);
        clock.advance(Duration::days(2));

        assert_eq!(recorder.titles(), vec!["1 hour before", "30 minutes before", "Deadline"]);
    }

    #[test]
    fn past_due_date_gets_nothing() {
        let (clock, recorder, scheduler) = setup();
        let task = Task::new("Late").with_due(start() - Duration::minutes(1));
        let deadline_now = Task::new("Now").with_due(start());
        scheduler.observe(&[task, deadline_now]);

        assert_eq!(scheduler.armed_count(), 0);
        clock.advance(Duration::days(3));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn undated_and_completed_tasks_are_skipped() {
        let (_clock, _recorder, scheduler) = setup();
        let mut done = report();
        done.completed = true;
        scheduler.observe(&[Task::new("Undated"), done]);
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[test]
    fn far_due_date_arms_all_four() {
        let (_clock, _recorder, scheduler) = setup();
        let task = Task::new("Trip").with_due(start() + Duration::days(3));
        scheduler.observe(std::slice::from_ref(&task));
        assert_eq!(scheduler.armed_labels(task.id).len(), 4);
        assert_eq!(
            scheduler.next_fire(),
            Some((task.id, "1 day before", start() + Duration::days(2)))
        );
    }

    #[test]
    fn dispose_cancels_everything() {
        let (clock, recorder, scheduler) = setup();
        scheduler.observe(&[report()]);
        scheduler.dispose();

        assert_eq!(clock.pending(), 0);
        clock.advance(Duration::hours(3));
        assert_eq!(recorder.count(), 0);

        scheduler.observe(&[report()]);
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[test]
    fn drop_cancels_everything() {
        let (clock, recorder, scheduler) = setup();
        scheduler.observe(&[report()]);
        drop(scheduler);

        clock.advance(Duration::hours(3));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn moved_due_date_does_not_repeat_a_shown_offset() {
        let (clock, recorder, scheduler) = setup();
        let mut task = report();
        scheduler.observe(std::slice::from_ref(&task));
        clock.advance(Duration::minutes(31));
        assert_eq!(recorder.titles(), vec!["1 hour before"]);

        task.due = Some(clock.now() + Duration::hours(5));
        scheduler.observe(std::slice::from_ref(&task));
        assert_eq!(
            scheduler.armed_labels(task.id),
            vec!["30 minutes before", "Deadline"]
        );
        assert!(scheduler.was_shown(&ReminderKey {
            task_id: task.id,
            label: "1 hour before",
        }));
    }

    #[test]
    fn reopening_a_task_does_not_unshow() {
        let (clock, recorder, scheduler) = setup();
        let mut task = report();
        scheduler.observe(std::slice::from_ref(&task));
        clock.advance(Duration::minutes(31));

        task.completed = true;
        scheduler.observe(std::slice::from_ref(&task));
        task.completed = false;
        scheduler.observe(std::slice::from_ref(&task));

        clock.advance(Duration::hours(2));
        assert_eq!(recorder.titles(), vec!["1 hour before", "30 minutes before", "Deadline"]);
    }

    #[test]
    fn removed_task_loses_its_timers() {
        let (clock, recorder, scheduler) = setup();
        let keep = Task::new("Keep").with_due(start() + Duration::minutes(10));
        let gone = Task::new("Gone").with_due(start() + Duration::minutes(20));
        scheduler.observe(&[keep.clone(), gone]);
        scheduler.observe(std::slice::from_ref(&keep));

        clock.advance(Duration::hours(1));
        let alerts = recorder.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].body, "Task: Keep");
        assert!(alerts[0].urgent);
    }

    #[test]
    fn urgency_follows_offset() {
        let (clock, recorder, scheduler) = setup();
        scheduler.observe(&[Task::new("Trip").with_due(start() + Duration::days(2))]);
        clock.advance(Duration::days(3));

        let urgent: Vec<bool> = recorder.alerts.lock().unwrap().iter().map(|a| a.urgent).collect();
        assert_eq!(urgent, vec![false, false, true, true]);
    }

    #[test]
    fn failing_channels_do_not_block_each_other() {
        let clock = ManualClock::new(start());
        let recorder = Recorder::default();
        let scheduler = ReminderScheduler::new(Arc::new(clock.clone()), Box::new(recorder.clone()))
            .with_system_alerts(Box::new(Broken), Box::new(StaticPermission(true)))
            .with_audio(Box::new(Broken));

        scheduler.observe(&[Task::new("Pay bill").with_due(start() + Duration::minutes(5))]);
        clock.advance(Duration::minutes(10));
        assert_eq!(recorder.titles(), vec!["Deadline"]);
    }

    #[test]
    fn in_app_failure_still_marks_shown() {
        let clock = ManualClock::new(start());
        let scheduler = ReminderScheduler::new(Arc::new(clock.clone()), Box::new(Broken));
        let task = Task::new("Pay bill").with_due(start() + Duration::minutes(5));
        scheduler.observe(std::slice::from_ref(&task));
        clock.advance(Duration::minutes(10));

        assert!(scheduler.was_shown(&ReminderKey {
            task_id: task.id,
            label: "Deadline",
        }));
        scheduler.observe(std::slice::from_ref(&task));
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn system_alerts_wait_for_permission() {
        let clock = ManualClock::new(start());
        let in_app = Recorder::default();
        let system = Recorder::default();
        let beeps = Beeps::default();
        let scheduler = ReminderScheduler::new(Arc::new(clock.clone()), Box::new(in_app.clone()))
            .with_system_alerts(Box::new(system.clone()), Box::new(StaticPermission(true)))
            .with_audio(Box::new(beeps.clone()));

        scheduler.observe(&[Task::new("First").with_due(start() + Duration::minutes(5))]);
        clock.advance(Duration::minutes(5));
        assert_eq!(in_app.count(), 1);
        assert_eq!(system.count(), 0);

        assert!(scheduler.request_permission().await);
        scheduler.observe(&[Task::new("Second").with_due(clock.now() + Duration::minutes(5))]);
        clock.advance(Duration::minutes(5));
        assert_eq!(in_app.count(), 2);
        assert_eq!(system.count(), 1);
        assert_eq!(beeps.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permission_without_provider_is_denied() {
        let (_clock, _recorder, scheduler) = setup();
        assert!(!scheduler.request_permission().await);

        let denied = ReminderScheduler::new(
            Arc::new(ManualClock::new(start())),
            Box::new(Recorder::default()),
        )
        .with_system_alerts(Box::new(Recorder::default()), Box::new(StaticPermission(false)));
        assert!(!denied.request_permission().await);
    }

    /// Timers whose cancellation always loses the race with firing.
    struct UncancellableClock(ManualClock);

    struct Ignored;

    impl TimerHandle for Ignored {
        fn cancel(&self) {}
    }

    impl Clock for UncancellableClock {
        fn now(&self) -> DateTime<Utc> {
            self.0.now()
        }

        fn schedule(&self, delay: std::time::Duration, callback: TimerCallback) -> Box<dyn TimerHandle> {
            self.0.schedule(delay, callback);
            Box::new(Ignored)
        }
    }

    #[test]
    fn timers_from_earlier_rounds_do_nothing() {
        let clock = ManualClock::new(start());
        let recorder = Recorder::default();
        let scheduler = ReminderScheduler::new(
            Arc::new(UncancellableClock(clock.clone())),
            Box::new(recorder.clone()),
        );
        let mut task = report();

        scheduler.observe(std::slice::from_ref(&task));
        scheduler.observe(std::slice::from_ref(&task));
        assert_eq!(clock.pending(), 6);

        clock.advance(Duration::minutes(45));
        assert_eq!(recorder.titles(), vec!["1 hour before"]);

        task.completed = true;
        scheduler.observe(std::slice::from_ref(&task));
        clock.advance(Duration::minutes(60));
        assert_eq!(recorder.titles(), vec!["1 hour before"]);
    }

    #[test]
    fn timers_surviving_dispose_do_nothing() {
        let clock = ManualClock::new(start());
        let recorder = Recorder::default();
        let scheduler = ReminderScheduler::new(
            Arc::new(UncancellableClock(clock.clone())),
            Box::new(recorder.clone()),
        );
        scheduler.observe(&[report()]);
        scheduler.dispose();

        assert_eq!(clock.pending(), 3);
        clock.advance(Duration::hours(2));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn independent_instances_do_not_share_shown_records() {
        let clock = ManualClock::new(start());
        let first = Recorder::default();
        let second = Recorder::default();
        let a = ReminderScheduler::new(Arc::new(clock.clone()), Box::new(first.clone()));
        let b = ReminderScheduler::new(Arc::new(clock.clone()), Box::new(second.clone()));

        let task = report();
        a.observe(std::slice::from_ref(&task));
        b.observe(std::slice::from_ref(&task));
        clock.advance(Duration::minutes(31));

        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }
}
