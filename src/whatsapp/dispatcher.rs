//! Turns a parsed message into store and timer operations and a reply.
//!
//! Stateless: every message resolves its task again from the store. The
//! whole dispatch runs inside one store call.

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc};

use super::parser::{self, Command, fold};
use crate::duration::{format_duration, parse_duration};
use crate::errors::Error;
use crate::models::{EntryFilter, EntryState, NewTask, Task, TimeEntry};
use crate::store::Store;
use crate::timer::{self, StopOutcome};

pub const HELP_TEXT: &str = "\
*Pontual: comandos*
• *tarefas*: lista as tarefas abertas (*tarefas todas* inclui concluídas)
• *criar* <nome> [--desc \"...\"] [--tempo 2h] [--prazo AAAA-MM-DD] [--cor azul]
• *iniciar* <tarefa>: inicia o timer
• *pausar* [tarefa]: pausa o timer
• *retomar* [tarefa]: retoma o timer pausado
• *parar* [tarefa]: encerra o timer
• *lancar* <tarefa> <tempo> [nota]: registra tempo já trabalhado
• *concluir* <tarefa>: conclui a tarefa
• *reabrir* <tarefa>: reabre a tarefa
• *relatorio* [hoje|semana|mes]: tempo por tarefa
• *status*: timers ativos e total de hoje
Tarefas podem ser indicadas pelo número (#12) ou pelo nome.";

/// The outcome of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Canonical command name, or `None` for unrecognised input.
    pub command: Option<Command>,
    pub text: String,
    pub success: bool,
}

impl Reply {
    fn ok(command: Command, text: impl Into<String>) -> Self {
        Self {
            command: Some(command),
            text: text.into(),
            success: true,
        }
    }

    fn fail(command: Command, text: impl Into<String>) -> Self {
        Self {
            command: Some(command),
            text: format!("⚠️ {}", text.into()),
            success: false,
        }
    }
}

type HandlerResult = Result<String, String>;

/// Run the command in `text` against the store.
pub fn dispatch(store: &mut dyn Store, text: &str, now: DateTime<Utc>) -> Reply {
    let parsed = parser::parse_message(text);
    let Some(command) = parsed.command else {
        return Reply {
            command: None,
            text: format!(
                "❓ Comando \"{}\" não reconhecido.\n\n{}",
                parsed.keyword, HELP_TEXT
            ),
            success: false,
        };
    };
    let rest = parsed.rest.as_str();
    let result = match command {
        Command::Help => Ok(HELP_TEXT.to_string()),
        Command::List => list(store, rest, now),
        Command::Create => create(store, rest),
        Command::Start => start(store, rest, now),
        Command::Stop => stop(store, rest, now),
        Command::Pause => pause(store, rest, now),
        Command::Resume => resume(store, rest, now),
        Command::Log => log_time(store, &parsed.args, now),
        Command::Complete => complete(store, rest, now),
        Command::Reopen => reopen(store, rest),
        Command::Report => report(store, rest, now),
        Command::Status => status(store, now),
    };
    match result {
        Ok(text) => Reply::ok(command, text),
        Err(text) => Reply::fail(command, text),
    }
}

fn storage_error(err: Error) -> String {
    match err {
        Error::NotFound { .. } | Error::Conflict(_) | Error::Validation { .. } => err.to_string(),
        other => {
            tracing::error!(error = %other, "WhatsApp command failed");
            "Erro interno ao processar o comando".to_string()
        }
    }
}

fn label(task: &Task) -> String {
    format!("#{} {}", task.id, task.name)
}

// ── Task resolution ───────────────────────────────────────────────────

/// Find a task by `#id`, exact name or name fragment. Open tasks win over
/// closed ones at each step.
pub fn resolve_task(store: &mut dyn Store, query: &str) -> Result<Task, String> {
    let query = query.trim();
    if query.is_empty() {
        return Err("Informe a tarefa (número ou nome)".into());
    }
    if let Ok(id) = query.trim_start_matches('#').parse::<i64>() {
        return store
            .get_task(id)
            .map_err(storage_error)?
            .ok_or_else(|| format!("Tarefa #{} não encontrada", id));
    }

    let needle = fold(query);
    let tasks = store.list_tasks().map_err(storage_error)?;
    let exact: Vec<&Task> = tasks.iter().filter(|t| fold(&t.name) == needle).collect();
    let partial: Vec<&Task> = tasks
        .iter()
        .filter(|t| fold(&t.name).contains(&needle))
        .collect();

    for candidates in [exact, partial] {
        let open: Vec<&Task> = candidates.iter().copied().filter(|t| t.is_open()).collect();
        let pool = if open.is_empty() { candidates } else { open };
        match pool.as_slice() {
            [] => continue,
            [one] => return Ok((*one).clone()),
            many => {
                let names: Vec<String> = many.iter().take(5).map(|t| label(t)).collect();
                return Err(format!(
                    "Mais de uma tarefa corresponde a \"{}\": {}. Use o número.",
                    query,
                    names.join(", ")
                ));
            }
        }
    }
    Err(format!("Nenhuma tarefa encontrada para \"{}\"", query))
}

/// The active entry to act on: the one for `query`'s task, or the only
/// active entry when no task is given.
fn resolve_entry(
    store: &mut dyn Store,
    query: &str,
    wanted: &[EntryState],
) -> Result<(TimeEntry, Task), String> {
    let active: Vec<TimeEntry> = store
        .active_time_entries()
        .map_err(storage_error)?
        .into_iter()
        .filter(|e| wanted.contains(&e.state))
        .collect();

    let entry = if query.trim().is_empty() {
        match active.as_slice() {
            [] => return Err("Nenhum timer ativo".into()),
            [one] => one.clone(),
            _ => {
                return Err(
                    "Há mais de um timer ativo. Indique a tarefa, por exemplo: parar #12".into(),
                );
            }
        }
    } else {
        let task = resolve_task(store, query)?;
        active
            .into_iter()
            .find(|e| e.task_id == task.id)
            .ok_or_else(|| format!("Nenhum timer ativo para {}", label(&task)))?
    };
    let task = store
        .get_task(entry.task_id)
        .map_err(storage_error)?
        .ok_or_else(|| format!("Tarefa #{} não encontrada", entry.task_id))?;
    Ok((entry, task))
}

// ── Handlers ──────────────────────────────────────────────────────────

fn list(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let include_closed = matches!(fold(rest).as_str(), "todas" | "todos" | "all");
    let tasks = store.tasks_with_stats(now).map_err(storage_error)?;
    let shown: Vec<_> = tasks
        .iter()
        .filter(|t| include_closed || t.task.is_open())
        .collect();
    if shown.is_empty() {
        return Ok("📋 Nenhuma tarefa aberta. Crie uma com: criar <nome>".into());
    }
    let mut lines = vec!["📋 *Tarefas*".to_string()];
    for t in shown {
        let marker = if t.is_running {
            "▶️ "
        } else if t.task.is_completed {
            "✅ "
        } else {
            ""
        };
        let mut line = format!(
            "{}{} ({})",
            marker,
            label(&t.task),
            format_duration(t.total_time)
        );
        if let Some(budget) = t.task.estimated_seconds() {
            line.push_str(&format!(" / {}", format_duration(budget)));
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

fn create(store: &mut dyn Store, rest: &str) -> HandlerResult {
    let args = parser::parse_create_args(rest)?;
    if args.name.is_empty() {
        return Err("Informe o nome da tarefa. Exemplo: criar Relatório --tempo 2h".into());
    }
    let task = store
        .create_task(NewTask {
            name: args.name.clone(),
            description: args.description.clone(),
            color: args.color.clone(),
            estimated_hours: args.estimated_hours(),
            deadline: args.deadline,
            user_id: None,
        })
        .map_err(storage_error)?;

    let mut text = format!("✅ Tarefa criada: {}", label(&task));
    if let Some(seconds) = args.estimated_seconds {
        text.push_str(&format!("\n⏱️ Estimativa: {}", format_duration(seconds)));
    }
    if let Some(deadline) = task.deadline {
        text.push_str(&format!("\n📅 Prazo: {}", deadline.format("%d/%m/%Y")));
    }
    Ok(text)
}

fn start(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let task = resolve_task(store, rest)?;
    match timer::start(store, task.id, None, None, now) {
        Ok(_) => Ok(format!("▶️ Timer iniciado: {}", label(&task))),
        Err(Error::Conflict(_)) => Err(format!("Já existe um timer rodando para {}", label(&task))),
        Err(e) => Err(storage_error(e)),
    }
}

fn stop(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let (entry, task) = resolve_entry(store, rest, &[EntryState::Running, EntryState::Paused])?;
    let outcome = timer::stop(store, entry.id, now).map_err(storage_error)?;
    Ok(match outcome {
        StopOutcome::Saved { entry } => format!(
            "⏹️ Timer encerrado: {}\nTempo registrado: {}",
            label(&task),
            format_duration(entry.duration.unwrap_or(0))
        ),
        StopOutcome::Discarded { duration, .. } => format!(
            "⏹️ Timer encerrado: {}\nSessão de {} descartada (menos de 1 minuto)",
            label(&task),
            format_duration(duration)
        ),
    })
}

fn pause(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let (entry, task) = resolve_entry(store, rest, &[EntryState::Running])?;
    let entry = timer::pause(store, entry.id, now).map_err(storage_error)?;
    Ok(format!(
        "⏸️ Timer pausado: {}\nAcumulado: {}",
        label(&task),
        format_duration(entry.duration.unwrap_or(0))
    ))
}

fn resume(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let (entry, task) = resolve_entry(store, rest, &[EntryState::Paused])?;
    match timer::resume(store, entry.id, now) {
        Ok(_) => Ok(format!("▶️ Timer retomado: {}", label(&task))),
        Err(Error::Conflict(_)) => Err(format!("Já existe um timer rodando para {}", label(&task))),
        Err(e) => Err(storage_error(e)),
    }
}

/// `lancar <tarefa> <tempo> [nota]`: the first token after the task that
/// parses as a duration splits the task from the note.
fn log_time(store: &mut dyn Store, args: &[String], now: DateTime<Utc>) -> HandlerResult {
    let split = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, token)| parse_duration(token) > 0)
        .map(|(i, _)| i);
    let Some(split) = split else {
        return Err("Uso: lancar <tarefa> <tempo> [nota]. Exemplo: lancar #3 1h30min".into());
    };
    let task = resolve_task(store, &args[..split].join(" "))?;
    let seconds = parse_duration(&args[split]);
    let notes = Some(args[split + 1..].join(" ")).filter(|n| !n.is_empty());
    timer::log_time(store, task.id, seconds, notes, None, now).map_err(storage_error)?;
    Ok(format!(
        "📝 {} registrado em {}",
        format_duration(seconds),
        label(&task)
    ))
}

fn complete(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let task = resolve_task(store, rest)?;
    if task.is_completed {
        return Err(format!("{} já está concluída", label(&task)));
    }
    let active = store
        .active_time_entries()
        .map_err(storage_error)?
        .into_iter()
        .find(|e| e.task_id == task.id);
    let mut text = format!("✅ Tarefa concluída: {}", label(&task));
    match active {
        Some(entry) => {
            let (entry, _) =
                timer::finish_and_complete(store, entry.id, task.id, now).map_err(storage_error)?;
            text.push_str(&format!(
                "\nTimer encerrado com {}",
                format_duration(entry.duration.unwrap_or(0))
            ));
        }
        None => {
            store
                .set_task_completion(task.id, Some(now))
                .map_err(storage_error)?;
        }
    }
    Ok(text)
}

fn reopen(store: &mut dyn Store, rest: &str) -> HandlerResult {
    let task = resolve_task(store, rest)?;
    if !task.is_completed {
        return Err(format!("{} não está concluída", label(&task)));
    }
    store
        .set_task_completion(task.id, None)
        .map_err(storage_error)?;
    Ok(format!("🔄 Tarefa reaberta: {}", label(&task)))
}

fn report(store: &mut dyn Store, rest: &str, now: DateTime<Utc>) -> HandlerResult {
    let today = now.date_naive();
    let (title, from_date) = match fold(rest).as_str() {
        "" | "hoje" | "dia" | "today" => ("hoje", today),
        "semana" | "week" => {
            let back = u64::from(today.weekday().num_days_from_monday());
            ("nesta semana", today - Days::new(back))
        }
        "mes" | "month" => ("neste mês", today.with_day(1).unwrap_or(today)),
        other => {
            return Err(format!(
                "Período \"{}\" inválido. Use hoje, semana ou mes",
                other
            ));
        }
    };
    let from = from_date.and_time(NaiveTime::MIN).and_utc();
    let to = (today + Days::new(1)).and_time(NaiveTime::MIN).and_utc();
    let rows = store.time_by_task(from, to, now).map_err(storage_error)?;
    if rows.is_empty() {
        return Ok(format!("📊 Nenhum tempo registrado {}", title));
    }
    let total: i64 = rows.iter().map(|r| r.total_time).sum();
    let mut lines = vec![format!("📊 *Relatório {}*", title)];
    for row in &rows {
        lines.push(format!(
            "#{} {}: {}",
            row.task_id,
            row.task_name,
            format_duration(row.total_time)
        ));
    }
    lines.push(format!("*Total: {}*", format_duration(total)));
    Ok(lines.join("\n"))
}

fn status(store: &mut dyn Store, now: DateTime<Utc>) -> HandlerResult {
    let active = store.active_time_entries().map_err(storage_error)?;
    let mut lines = Vec::new();
    if active.is_empty() {
        lines.push("⏱️ Nenhum timer ativo".to_string());
    } else {
        lines.push("⏱️ *Timers ativos*".to_string());
        for entry in &active {
            let name = store
                .get_task(entry.task_id)
                .map_err(storage_error)?
                .map(|t| label(&t))
                .unwrap_or_else(|| format!("#{}", entry.task_id));
            let state = if entry.is_running { "▶️" } else { "⏸️" };
            lines.push(format!(
                "{} {}: {}",
                state,
                name,
                format_duration(entry.effective_seconds(now))
            ));
        }
    }
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let today: i64 = store
        .list_time_entries(&EntryFilter {
            from: Some(midnight),
            ..Default::default()
        })
        .map_err(storage_error)?
        .iter()
        .map(|e| e.effective_seconds(now))
        .sum();
    lines.push(format!("Hoje: {}", format_duration(today)));
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 16, 14, 0, 0).unwrap()
    }

    fn store_with(names: &[&str]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for name in names {
            store
                .create_task(NewTask {
                    name: name.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn unknown_command_returns_help() {
        let mut store = store_with(&[]);
        let reply = dispatch(&mut store, "dançar agora", now());
        assert_eq!(reply.command, None);
        assert!(!reply.success);
        assert!(reply.text.contains("não reconhecido"));
        assert!(reply.text.contains(HELP_TEXT));
    }

    #[test]
    fn create_then_list() {
        let mut store = store_with(&[]);
        let reply = dispatch(
            &mut store,
            r#"criar Relatório mensal --tempo 2h --desc "fechamento""#,
            now(),
        );
        assert!(reply.success, "{}", reply.text);
        assert!(reply.text.contains("#1 Relatório mensal"));
        let task = store.get_task(1).unwrap().unwrap();
        assert_eq!(task.estimated_hours, Some(2.0));
        assert_eq!(task.description.as_deref(), Some("fechamento"));

        let list = dispatch(&mut store, "tarefas", now());
        assert!(list.text.contains("#1 Relatório mensal (0s) / 2h"), "{}", list.text);
    }

    #[test]
    fn create_without_name_fails() {
        let mut store = store_with(&[]);
        let reply = dispatch(&mut store, "criar --tempo 2h", now());
        assert!(!reply.success);
        assert!(store.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn start_pause_resume_stop_by_name() {
        let mut store = store_with(&["Relatório", "Reunião"]);
        let t0 = now();
        assert!(dispatch(&mut store, "iniciar relatorio", t0).success);

        let dup = dispatch(&mut store, "iniciar #1", t0);
        assert!(!dup.success);
        assert!(dup.text.contains("Já existe um timer"));

        let paused = dispatch(&mut store, "pausar", t0 + Duration::seconds(40));
        assert!(paused.success, "{}", paused.text);
        assert!(paused.text.contains("40s"));

        assert!(dispatch(&mut store, "retomar", t0 + Duration::minutes(5)).success);
        let stopped = dispatch(&mut store, "parar", t0 + Duration::minutes(5) + Duration::seconds(50));
        assert!(stopped.success, "{}", stopped.text);
        assert!(stopped.text.contains("1min"), "{}", stopped.text);
        assert!(store.active_time_entries().unwrap().is_empty());
    }

    #[test]
    fn short_stop_reports_discard() {
        let mut store = store_with(&["Demo"]);
        dispatch(&mut store, "start demo", now());
        let reply = dispatch(&mut store, "stop demo", now() + Duration::seconds(2));
        assert!(reply.success);
        assert!(reply.text.contains("descartada"));
        assert!(store
            .list_time_entries(&EntryFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn implicit_entry_must_be_unambiguous() {
        let mut store = store_with(&["A", "B"]);
        assert!(!dispatch(&mut store, "parar", now()).success);
        dispatch(&mut store, "iniciar #1", now());
        dispatch(&mut store, "iniciar #2", now());
        let reply = dispatch(&mut store, "parar", now() + Duration::minutes(2));
        assert!(!reply.success);
        assert!(reply.text.contains("mais de um timer"));
    }

    #[test]
    fn resolution_prefers_exact_then_open_tasks() {
        let mut store = store_with(&["Site", "Site novo", "Site antigo"]);
        assert_eq!(resolve_task(&mut store, "site").unwrap().id, 1);
        assert!(resolve_task(&mut store, "sit").is_err());
        assert_eq!(resolve_task(&mut store, "ANTIGO").unwrap().id, 3);

        store.set_task_completion(2, Some(now())).unwrap();
        store.set_task_completion(3, Some(now())).unwrap();
        store.set_task_completion(1, Some(now())).unwrap();
        // All closed: fall back to closed candidates.
        assert_eq!(resolve_task(&mut store, "novo").unwrap().id, 2);
        assert!(resolve_task(&mut store, "#99").is_err());
    }

    #[test]
    fn log_time_splits_task_and_note() {
        let mut store = store_with(&["Reunião cliente"]);
        let reply = dispatch(&mut store, "lançar reuniao cliente 1h30min alinhamento inicial", now());
        assert!(reply.success, "{}", reply.text);
        let entries = store.list_time_entries(&EntryFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].duration, Some(5400));
        assert_eq!(entries[0].notes.as_deref(), Some("alinhamento inicial"));

        assert!(!dispatch(&mut store, "lancar reuniao", now()).success);
    }

    #[test]
    fn log_time_rejects_huge_durations() {
        let mut store = store_with(&["Demo"]);
        let reply = dispatch(&mut store, "lancar #1 99999999999999h", now());
        assert!(!reply.success);
        assert!(reply.text.contains("duration"), "{}", reply.text);

        let reply = dispatch(&mut store, "lancar #1 153722867280912931min", now());
        assert!(!reply.success);
        assert!(reply.text.starts_with("Uso: lancar"), "{}", reply.text);

        assert!(store
            .list_time_entries(&EntryFilter::default())
            .unwrap()
            .is_empty());
        assert!(dispatch(&mut store, "lancar #1 2h", now()).success);
    }

    #[test]
    fn complete_finishes_active_timer_and_reopen_reverts() {
        let mut store = store_with(&["Demo"]);
        dispatch(&mut store, "iniciar demo", now());
        let reply = dispatch(&mut store, "concluir demo", now() + Duration::seconds(10));
        assert!(reply.success, "{}", reply.text);
        let task = store.get_task(1).unwrap().unwrap();
        assert!(task.is_completed);
        let entries = store.list_time_entries(&EntryFilter::default()).unwrap();
        assert_eq!(entries[0].duration, Some(60));

        assert!(!dispatch(&mut store, "concluir #1", now()).success);
        assert!(dispatch(&mut store, "reabrir #1", now()).success);
        assert!(!store.get_task(1).unwrap().unwrap().is_completed);
    }

    #[test]
    fn report_and_status_summarize_time() {
        let mut store = store_with(&["Demo"]);
        dispatch(&mut store, "lancar demo 2h", now());
        let report = dispatch(&mut store, "relatório semana", now());
        assert!(report.text.contains("#1 Demo: 2h"), "{}", report.text);
        assert!(report.text.contains("Total: 2h"));
        assert!(!dispatch(&mut store, "relatorio ano", now()).success);

        dispatch(&mut store, "iniciar demo", now());
        let status = dispatch(&mut store, "status", now() + Duration::minutes(15));
        assert!(status.text.contains("▶️ #1 Demo: 15min"), "{}", status.text);
        assert!(status.text.contains("Hoje: 2h 15min"), "{}", status.text);
    }
}
