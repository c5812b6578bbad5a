//! Chat commands understood by the bot.
//!
//! Replies are plain text blocks; the poller hands them to the deliverer.

use crate::broadcast::report_to;
use crate::dataset::Dataset;
use crate::normalize::title_case;
use crate::registry::Recipient;
use crate::resolver::{find, Lookup};
use crate::state::AppState;

pub const USAGE_AVANCE: &str = "Usa: /avance puente X";
pub const HELP: &str = "Comandos disponibles:\n\
    /avance puente X - avance del puente X\n\
    /pendientes - ensayos de laboratorio pendientes\n\
    /suscribir - recibir el reporte diario de ensayos pendientes\n\
    /ayuda - esta ayuda";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Progress(Vec<String>),
    Pending,
    Subscribe,
    Unknown(String),
}

/// Parse a chat message into a command. Non-command text yields `None`.
///
/// Accepts the `/cmd@BotName` form Telegram uses in groups.
pub fn parse_command(text: &str) -> Option<Command> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    let args: Vec<String> = parts.map(str::to_string).collect();

    Some(match name.as_str() {
        "start" => Command::Start,
        "ayuda" | "help" => Command::Help,
        "avance" => Command::Progress(args),
        "pendientes" => Command::Pending,
        "suscribir" => Command::Subscribe,
        _ => Command::Unknown(name),
    })
}

/// Build the query string for `/avance`. `puente X` is the documented form;
/// a bare `puente` gets the usage hint, anything else is taken verbatim.
pub fn progress_query(args: &[String]) -> Option<String> {
    match args {
        [] => None,
        [kind] if kind.eq_ignore_ascii_case("puente") => None,
        [kind, number] if kind.eq_ignore_ascii_case("puente") => Some(format!("puente {}", number)),
        _ => Some(args.join(" ")),
    }
}

/// Reply to a progress query against a dataset snapshot.
pub fn progress_reply(dataset: &Dataset, query: &str, progress_columns: &[String]) -> String {
    let display = title_case(query);
    match find(dataset, query) {
        Lookup::DataUnavailable => "Error al cargar los datos.".to_string(),
        Lookup::NotFound => format!("No encontré información para {}", display),
        Lookup::Found(record) => {
            if !progress_columns.iter().any(|c| dataset.has_column(c)) {
                return "Las columnas necesarias no están en el archivo.".to_string();
            }
            match record.progress_percent.as_deref() {
                Some(value) => format!(
                    "El avance de {} es {}%",
                    record.project_id,
                    value.trim().trim_end_matches('%').trim()
                ),
                None => format!("{} no tiene avance registrado.", record.project_id),
            }
        }
    }
}

/// Handle one chat message. Returns the replies to send back to `chat`.
pub async fn dispatch(state: &AppState, chat: &Recipient, text: &str) -> Vec<String> {
    let Some(command) = parse_command(text) else {
        return Vec::new();
    };
    log::info!("Chat {}: {:?}", chat, command);

    match command {
        Command::Start => vec![format!("¡Hola! Escribe: /avance puente X\n\n{}", HELP)],
        Command::Help => vec![HELP.to_string()],
        Command::Progress(args) => match progress_query(&args) {
            Some(query) => {
                let dataset = state.cache.get_dataset().await;
                vec![progress_reply(&dataset, &query, &state.config.columns.progress)]
            }
            None => vec![USAGE_AVANCE.to_string()],
        },
        Command::Pending => {
            if let Err(e) = report_to(state, chat, state.local_now()).await {
                log::warn!("On-demand report to {} failed: {}", chat, e);
            }
            Vec::new()
        }
        Command::Subscribe => {
            if state.registry.register(chat.clone()) {
                vec!["Listo. Recibirás el reporte diario de ensayos pendientes.".to_string()]
            } else {
                vec!["Este chat ya está suscrito al reporte diario.".to_string()]
            }
        }
        Command::Unknown(_) => vec![HELP.to_string()],
    }
}
