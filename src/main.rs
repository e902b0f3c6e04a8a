use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use taskflow::config::TaskflowConfig;
use taskflow::core::{Category, DateRange, Priority, StatusFilter, Task, TaskList, TaskQuery};
use taskflow::reminder::notify::{ConsoleBanner, JournalAlert, TerminalBell, TerminalPermission};
use taskflow::reminder::{ReminderScheduler, TokioClock};

const USAGE: &str = "\
usage: taskflow <command> [args]

commands:
  add <title> [--priority low|medium|high] [--category c] [--due <when>]
  list [all|active|completed] [--category c] [--today|--tomorrow|--week|--overdue|--upcoming]
  done <id>          toggle completion
  remove <id>
  clear              remove completed tasks
  edit <id> [--title t] [--due <when>|--no-due] [--priority p] [--category c]
  subtask <id> <title>
  subtask-done <id> <subtask-id>   toggle a subtask
  watch              show reminders until interrupted

<when> is RFC 3339, 'YYYY-MM-DD HH:MM' local time, or relative like +30m, +2h, +1d.
<id> may be any unique prefix.";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TaskflowConfig::load_or_default(&TaskflowConfig::default_path());
    init_logging(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];
    let path = config.tasks_path();

    match command.as_str() {
        "add" => cmd_add(&path, rest)?,
        "list" => cmd_list(&path, rest)?,
        "done" => {
            let mut list = TaskList::load(&path)?;
            let id = resolve(&list, rest.first())?;
            list.toggle(id)?;
            list.save(&path)?;
        }
        "remove" => {
            let mut list = TaskList::load(&path)?;
            let id = resolve(&list, rest.first())?;
            let task = list.remove(id)?;
            list.save(&path)?;
            println!("Removed: {}", task.title);
        }
        "clear" => {
            let mut list = TaskList::load(&path)?;
            let removed = list.clear_completed();
            list.save(&path)?;
            println!("Cleared {} completed tasks", removed);
        }
        "subtask" => {
            let mut list = TaskList::load(&path)?;
            let id = resolve(&list, rest.first())?;
            let title = rest[1..].join(" ");
            if title.trim().is_empty() {
                return Err("subtask needs a title".into());
            }
            list.add_subtask(id, &title)?;
            list.save(&path)?;
        }
        "edit" => {
            let mut list = TaskList::load(&path)?;
            let id = resolve(&list, rest.first())?;
            let edit = parse_edit(&rest[1..], Utc::now(), &Local)?;
            if edit.is_empty() {
                return Err("nothing to change".into());
            }
            list.update(id, |task| edit.apply(task))?;
            list.save(&path)?;
        }
        "subtask-done" => {
            let mut list = TaskList::load(&path)?;
            let id = resolve(&list, rest.first())?;
            let task = list.get(id).ok_or("task vanished")?;
            let subtask = resolve_subtask(task, rest.get(1))?;
            list.toggle_subtask(id, subtask)?;
            list.save(&path)?;
        }
        "watch" => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(watch(&config))?;
        }
        "help" | "--help" | "-h" => println!("{}", USAGE),
        other => return Err(format!("unknown command '{}'\n\n{}", other, USAGE).into()),
    }

    Ok(())
}

// Wrapper filters: taskflow targets at info/debug (per config), everything else at warn.
struct Filtered<L: log::Log> {
    inner: L,
}

impl<L: log::Log> log::Log for Filtered<L> {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        if metadata.target().starts_with("taskflow") {
            let max = if taskflow::debug_logging() {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            };
            metadata.level() <= max
        } else {
            metadata.level() <= log::LevelFilter::Warn
        }
    }
    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }
    fn flush(&self) {
        self.inner.flush();
    }
}

/// Stderr logger for runs outside systemd. Level policy lives in `Filtered`.
fn stderr_logger() -> env_logger::Logger {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .build()
}

fn init_logging(config: &TaskflowConfig) {
    taskflow::set_debug_logging(config.debug_logging);

    // Journal when running under systemd (`journalctl --user -t taskflow -f`), stderr otherwise.
    let journal = if systemd_journal_logger::connected_to_journal() {
        systemd_journal_logger::JournalLog::new().ok()
    } else {
        None
    };
    let installed = match journal {
        Some(journal) => log::set_boxed_logger(Box::new(Filtered {
            inner: journal.with_syslog_identifier("taskflow".to_string()),
        })),
        None => log::set_boxed_logger(Box::new(Filtered {
            inner: stderr_logger(),
        })),
    };
    if installed.is_ok() {
        // Global max must be Debug so taskflow debug logs can pass through when toggled
        log::set_max_level(log::LevelFilter::Debug);
    }
}

fn resolve(list: &TaskList, arg: Option<&String>) -> Result<uuid::Uuid, String> {
    let prefix = arg.ok_or("missing task id")?;
    list.find_by_prefix(prefix)
        .map(|t| t.id)
        .ok_or_else(|| format!("no unique task matches '{}'", prefix))
}

fn resolve_subtask(task: &Task, arg: Option<&String>) -> Result<uuid::Uuid, String> {
    let prefix = arg.ok_or("missing subtask id")?.to_ascii_lowercase();
    let mut matches = task
        .subtasks
        .iter()
        .filter(|s| s.id.to_string().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(subtask), None) => Ok(subtask.id),
        _ => Err(format!("no unique subtask of '{}' matches '{}'", task.title, prefix)),
    }
}

/// Field changes requested by `edit`. `None` leaves a field alone.
#[derive(Debug, Default, PartialEq)]
struct TaskEdit {
    title: Option<String>,
    due: Option<Option<DateTime<Utc>>>,
    priority: Option<Priority>,
    category: Option<Category>,
}

impl TaskEdit {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(due) = self.due {
            task.due = due;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
    }
}

fn parse_edit<Tz: TimeZone>(args: &[String], now: DateTime<Utc>, tz: &Tz) -> Result<TaskEdit, String> {
    let mut edit = TaskEdit::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--title" | "-t" => {
                let title = iter.next().ok_or("--title needs a value")?.trim();
                if title.is_empty() {
                    return Err("title cannot be empty".to_string());
                }
                edit.title = Some(title.to_string());
            }
            "--due" | "-d" => {
                let when = iter.next().ok_or("--due needs a value")?;
                edit.due = Some(Some(parse_due(when, now, tz)?));
            }
            "--no-due" => edit.due = Some(None),
            "--priority" | "-p" => edit.priority = Some(iter.next().ok_or("--priority needs a value")?.parse()?),
            "--category" | "-c" => edit.category = Some(iter.next().ok_or("--category needs a value")?.parse()?),
            other => return Err(format!("unknown edit option '{}'", other)),
        }
    }
    Ok(edit)
}

fn cmd_add(path: &Path, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut title = Vec::new();
    let mut task_priority = Priority::default();
    let mut category = Category::default();
    let mut due = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--priority" | "-p" => task_priority = iter.next().ok_or("--priority needs a value")?.parse()?,
            "--category" | "-c" => category = iter.next().ok_or("--category needs a value")?.parse()?,
            "--due" | "-d" => {
                let when = iter.next().ok_or("--due needs a value")?;
                due = Some(parse_due(when, Utc::now(), &Local)?);
            }
            word => title.push(word),
        }
    }

    let title = title.join(" ");
    if title.trim().is_empty() {
        return Err("task needs a title".into());
    }

    let mut task = Task::new(title)
        .with_priority(task_priority)
        .with_category(category);
    task.due = due;

    let mut list = TaskList::load(path)?;
    let id = list.add(task);
    list.save(path)?;
    println!("Added {}", short_id(&id));
    Ok(())
}

fn cmd_list(path: &Path, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut query = TaskQuery::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--category" | "-c" => {
                query.category = Some(iter.next().ok_or("--category needs a value")?.parse()?)
            }
            "--today" => query.range = Some(DateRange::Today),
            "--tomorrow" => query.range = Some(DateRange::Tomorrow),
            "--week" => query.range = Some(DateRange::ThisWeek),
            "--overdue" => query.range = Some(DateRange::Overdue),
            "--upcoming" => query.range = Some(DateRange::Upcoming),
            other => {
                query.status = StatusFilter::from_keyword(other)
                    .ok_or_else(|| format!("unknown filter '{}'", other))?
            }
        }
    }

    let list = TaskList::load(path)?;
    let now = Local::now();
    for task in query.apply(list.tasks(), &now) {
        println!("{}", render(task, now.to_utc()));
    }
    println!(
        "\n{} active, {} completed",
        list.active_count(),
        list.completed_count()
    );
    Ok(())
}

fn render(task: &Task, now: DateTime<Utc>) -> String {
    let check = if task.completed { "x" } else { " " };
    let mut line = format!(
        "[{}] {}  {:<6} {:<8} {}",
        check,
        short_id(&task.id),
        task.priority,
        task.category,
        task.title
    );
    if let Some(due) = task.due {
        line.push_str(&format!("  (due {})", due.with_timezone(&Local).format("%Y-%m-%d %H:%M")));
        if task.is_overdue(now) {
            line.push_str(" OVERDUE");
        }
    }
    let (done, total) = task.subtask_progress();
    if total > 0 {
        line.push_str(&format!("  [{}/{}]", done, total));
    }
    line
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Parse `+30m`/`+2h`/`+1d`, RFC 3339, or `YYYY-MM-DD HH:MM` in `tz`.
fn parse_due<Tz: TimeZone>(s: &str, now: DateTime<Utc>, tz: &Tz) -> Result<DateTime<Utc>, String> {
    if let Some(relative) = s.strip_prefix('+') {
        let split = relative.char_indices().last().map_or(0, |(i, _)| i);
        let (amount, unit) = relative.split_at(split);
        let amount: i64 = amount
            .parse()
            .map_err(|_| format!("bad relative due date '{}'", s))?;
        let delta = match unit {
            "m" => chrono::Duration::try_minutes(amount),
            "h" => chrono::Duration::try_hours(amount),
            "d" => chrono::Duration::try_days(amount),
            _ => None,
        }
        .ok_or_else(|| format!("bad relative due date '{}'", s))?;
        return now
            .checked_add_signed(delta)
            .ok_or_else(|| format!("due date '{}' out of range", s));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.to_utc());
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .map_err(|_| format!("unrecognised due date '{}'", s))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.to_utc())
        .ok_or_else(|| format!("'{}' does not exist in the local time zone", s))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn watch(config: &TaskflowConfig) -> Result<(), Box<dyn std::error::Error>> {
    let path = config.tasks_path();
    let clock = Arc::new(TokioClock::current()?);

    let mut scheduler = ReminderScheduler::new(clock, Box::new(ConsoleBanner));
    if config.system_notifications {
        scheduler = scheduler.with_system_alerts(Box::new(JournalAlert), Box::new(TerminalPermission));
    }
    if config.sound_enabled {
        scheduler = scheduler.with_audio(Box::new(TerminalBell));
    }
    let scheduler = Arc::new(scheduler);
    scheduler.request_permission().await;

    let mut list = TaskList::load(&path)?;
    list.subscribe(scheduler.clone());
    let mut last_seen = modified(&path);
    report_next(&scheduler);

    let mut poll = tokio::time::interval(Duration::from_secs(2));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = poll.tick() => {
                let current = modified(&path);
                if current == last_seen {
                    continue;
                }
                last_seen = current;
                match TaskList::load(&path) {
                    Ok(mut reloaded) => {
                        log::debug!("Task file changed, rescheduling reminders");
                        reloaded.subscribe(scheduler.clone());
                        list = reloaded;
                        report_next(&scheduler);
                    }
                    Err(e) => log::error!("Failed to reload tasks: {}", e),
                }
            }
        }
    }

    log::info!("Watching stopped with {} tasks loaded", list.tasks().len());
    scheduler.dispose();
    Ok(())
}

fn report_next(scheduler: &ReminderScheduler) {
    match scheduler.next_fire() {
        Some((id, label, at)) => println!(
            "{} reminders armed; next: '{}' for {} at {}",
            scheduler.armed_count(),
            label,
            short_id(&id),
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("No reminders armed"),
    }
}
