//! Free-text command parsing.
//!
//! The first whitespace token picks the command through a fixed alias table
//! (case and accents are ignored); the remaining tokens are its arguments.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;

use crate::duration::parse_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Create,
    Start,
    Stop,
    Pause,
    Resume,
    Log,
    Complete,
    Reopen,
    Report,
    Status,
}

const ALIASES: &[(&str, Command)] = &[
    ("ajuda", Command::Help),
    ("help", Command::Help),
    ("menu", Command::Help),
    ("tarefas", Command::List),
    ("listar", Command::List),
    ("lista", Command::List),
    ("list", Command::List),
    ("tasks", Command::List),
    ("criar", Command::Create),
    ("nova", Command::Create),
    ("novo", Command::Create),
    ("create", Command::Create),
    ("new", Command::Create),
    ("iniciar", Command::Start),
    ("comecar", Command::Start),
    ("start", Command::Start),
    ("parar", Command::Stop),
    ("stop", Command::Stop),
    ("pausar", Command::Pause),
    ("pause", Command::Pause),
    ("retomar", Command::Resume),
    ("continuar", Command::Resume),
    ("resume", Command::Resume),
    ("lancar", Command::Log),
    ("registrar", Command::Log),
    ("log", Command::Log),
    ("concluir", Command::Complete),
    ("completar", Command::Complete),
    ("complete", Command::Complete),
    ("done", Command::Complete),
    ("reabrir", Command::Reopen),
    ("reopen", Command::Reopen),
    ("relatorio", Command::Report),
    ("report", Command::Report),
    ("status", Command::Status),
];

impl Command {
    pub fn lookup(token: &str) -> Option<Self> {
        let token = fold(token);
        let token = token.trim_start_matches('/');
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == token)
            .map(|(_, cmd)| *cmd)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::List => "list",
            Self::Create => "create",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Log => "log",
            Self::Complete => "complete",
            Self::Reopen => "reopen",
            Self::Report => "report",
            Self::Status => "status",
        }
    }
}

/// A tokenized message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    /// `None` when the first token is not a known alias.
    pub command: Option<Command>,
    /// The first token as typed.
    pub keyword: String,
    /// Everything after the first token, trimmed.
    pub rest: String,
    pub args: Vec<String>,
}

pub fn parse_message(text: &str) -> ParsedMessage {
    let text = text.trim();
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (text, ""),
    };
    ParsedMessage {
        command: Command::lookup(keyword),
        keyword: keyword.to_string(),
        rest: rest.to_string(),
        args: rest.split_whitespace().map(str::to_string).collect(),
    }
}

/// Lower-case and strip Portuguese diacritics.
pub fn fold(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

// ── Create-task options ───────────────────────────────────────────────

static OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"--([A-Za-z]+)\s+(?:"([^"]*)"|“([^”]*)”|(\S+))"#).unwrap()
});
static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap());

const NAMED_COLORS: &[(&str, &str)] = &[
    ("azul", "#3B82F6"),
    ("verde", "#10B981"),
    ("vermelho", "#EF4444"),
    ("amarelo", "#F59E0B"),
    ("laranja", "#F97316"),
    ("roxo", "#8B5CF6"),
    ("rosa", "#EC4899"),
    ("cinza", "#6B7280"),
    ("preto", "#111827"),
];

/// Task fields extracted from a create command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateTaskArgs {
    pub name: String,
    pub description: Option<String>,
    pub estimated_seconds: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
    pub color: Option<String>,
}

impl CreateTaskArgs {
    pub fn estimated_hours(&self) -> Option<f64> {
        self.estimated_seconds.map(|s| s as f64 / 3600.0)
    }
}

/// Split `--key value` options off the create arguments. Unknown keys are
/// dropped; an invalid value for a known key is an error message for the
/// sender.
pub fn parse_create_args(input: &str) -> Result<CreateTaskArgs, String> {
    let mut args = CreateTaskArgs::default();
    for caps in OPTION.captures_iter(input) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().trim())
            .unwrap_or_default();
        match fold(&caps[1]).as_str() {
            "desc" | "descricao" => {
                args.description = Some(value.to_string()).filter(|d| !d.is_empty());
            }
            "tempo" | "estimativa" => {
                let seconds = parse_duration(value);
                if seconds <= 0 {
                    return Err(format!("Tempo inválido: {}. Use por exemplo 2h30min", value));
                }
                args.estimated_seconds = Some(seconds);
            }
            "prazo" => {
                let date = parse_date(value).ok_or_else(|| {
                    format!("Prazo inválido: {}. Use AAAA-MM-DD ou DD/MM/AAAA", value)
                })?;
                args.deadline = Some(end_of_day(date));
            }
            "cor" => {
                args.color = Some(parse_color(value).ok_or_else(|| {
                    format!("Cor inválida: {}. Use um nome (azul, verde...) ou #RRGGBB", value)
                })?);
            }
            _ => {}
        }
    }
    let name = OPTION.replace_all(input, " ");
    args.name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(args)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    date.and_time(last).and_utc()
}

pub fn parse_color(value: &str) -> Option<String> {
    if HEX_COLOR.is_match(value) {
        return Some(value.to_uppercase());
    }
    let name = fold(value);
    NAMED_COLORS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, hex)| hex.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn aliases_resolve_regardless_of_case_and_accents() {
        assert_eq!(Command::lookup("Começar"), Some(Command::Start));
        assert_eq!(Command::lookup("LANÇAR"), Some(Command::Log));
        assert_eq!(Command::lookup("relatório"), Some(Command::Report));
        assert_eq!(Command::lookup("/ajuda"), Some(Command::Help));
        assert_eq!(Command::lookup("done"), Some(Command::Complete));
        assert_eq!(Command::lookup("dançar"), None);
    }

    #[test]
    fn message_splits_keyword_and_arguments() {
        let parsed = parse_message("  iniciar   Relatório mensal ");
        assert_eq!(parsed.command, Some(Command::Start));
        assert_eq!(parsed.keyword, "iniciar");
        assert_eq!(parsed.rest, "Relatório mensal");
        assert_eq!(parsed.args, vec!["Relatório", "mensal"]);

        let bare = parse_message("status");
        assert_eq!(bare.command, Some(Command::Status));
        assert!(bare.args.is_empty());
    }

    #[test]
    fn create_options_are_extracted() {
        let args = parse_create_args(
            r#"Site novo --desc "landing page" --tempo 2h30min --prazo 2025-07-05 --cor azul"#,
        )
        .unwrap();
        assert_eq!(args.name, "Site novo");
        assert_eq!(args.description.as_deref(), Some("landing page"));
        assert_eq!(args.estimated_seconds, Some(9000));
        assert_eq!(args.estimated_hours(), Some(2.5));
        let deadline = args.deadline.unwrap();
        assert_eq!((deadline.year(), deadline.month(), deadline.day()), (2025, 7, 5));
        assert_eq!(deadline.hour(), 23);
        assert_eq!(args.color.as_deref(), Some("#3B82F6"));
    }

    #[test]
    fn single_word_description_and_brazilian_date() {
        let args = parse_create_args("Revisão --desc urgente --prazo 05/07/2025").unwrap();
        assert_eq!(args.name, "Revisão");
        assert_eq!(args.description.as_deref(), Some("urgente"));
        assert_eq!(
            args.deadline.map(|d| d.date_naive()),
            NaiveDate::from_ymd_opt(2025, 7, 5)
        );
    }

    #[test]
    fn unknown_options_are_ignored() {
        let args = parse_create_args("Tarefa --prioridade alta --cor #a1b2c3").unwrap();
        assert_eq!(args.name, "Tarefa");
        assert_eq!(args.color.as_deref(), Some("#A1B2C3"));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(parse_create_args("X --tempo logo").is_err());
        assert!(parse_create_args("X --prazo amanhã").is_err());
        assert!(parse_create_args("X --cor fúcsia").is_err());
    }

    #[test]
    fn fold_strips_diacritics() {
        assert_eq!(fold("Ação Única"), "acao unica");
    }
}
