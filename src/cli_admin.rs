//! Offline administration of the audio database: seed users and phrases,
//! inspect stored audio, soft delete a recording.

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use chrono::{TimeZone, Utc};
use std::path::PathBuf;

use phrase_audio_server::audio::AudioRecord;
use phrase_audio_server::audio_store::{AudioStore, Phrase, SqliteAudioStore, User};
use phrase_audio_server::config::AUDIO_DB_FILE_NAME;

fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
}

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser)]
#[command(styles = get_styles())]
struct CliArgs {
    /// Directory holding the audio database.
    #[clap(long, value_parser = parse_path)]
    db_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a user. A random id is generated unless --id is given.
    AddUser {
        name: String,
        #[clap(long)]
        id: Option<String>,
    },

    /// Creates a phrase. A random id is generated unless --id is given.
    AddPhrase {
        text: String,
        #[clap(long)]
        id: Option<String>,
    },

    /// Shows all users.
    ListUsers,

    /// Shows all phrases.
    ListPhrases,

    /// Shows every audio record of a user, deleted ones included.
    ShowAudio { user_id: String },

    /// Soft deletes the live audio of a (user, phrase) pair.
    DeleteAudio {
        user_id: String,
        phrase_id: String,
        #[clap(long, default_value = "cli-admin")]
        deleted_by: String,
    },
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_record(record: &AudioRecord) {
    let state = match (record.deleted_at, &record.deleted_by) {
        (Some(at), Some(by)) => format!("deleted {} by {}", format_timestamp(at), by),
        (Some(at), None) => format!("deleted {}", format_timestamp(at)),
        _ => "live".to_string(),
    };
    println!(
        "{}  phrase={}  {} -> {}  key={}  created {}  [{}]",
        record.id,
        record.phrase_id,
        record.original_format,
        record.converted_format,
        record.storage_key,
        format_timestamp(record.created_at),
        state
    );
    if let Some(description) = &record.description {
        println!("    {}", description);
    }
}

fn execute(store: &dyn AudioStore, command: Command) -> Result<()> {
    match command {
        Command::AddUser { name, id } => {
            let user = match id {
                Some(id) => User::with_id(id, name),
                None => User::new(name),
            };
            store.add_user(&user)?;
            println!("Created user {} ({})", user.id, user.name);
        }
        Command::AddPhrase { text, id } => {
            let phrase = match id {
                Some(id) => Phrase::with_id(id, text),
                None => Phrase::new(text),
            };
            store.add_phrase(&phrase)?;
            println!("Created phrase {} ({})", phrase.id, phrase.text);
        }
        Command::ListUsers => {
            let users = store.list_users()?;
            if users.is_empty() {
                println!("(no users)");
            }
            for user in users {
                println!("{}  {}", user.id, user.name);
            }
        }
        Command::ListPhrases => {
            let phrases = store.list_phrases()?;
            if phrases.is_empty() {
                println!("(no phrases)");
            }
            for phrase in phrases {
                println!("{}  {}", phrase.id, phrase.text);
            }
        }
        Command::ShowAudio { user_id } => {
            if !store.user_exists(&user_id)? {
                bail!("User {} does not exist", user_id);
            }
            let records = store.list_audio_for_user(&user_id)?;
            if records.is_empty() {
                println!("(no audio)");
            }
            for record in &records {
                print_record(record);
            }
        }
        Command::DeleteAudio {
            user_id,
            phrase_id,
            deleted_by,
        } => match store.soft_delete_audio(&user_id, &phrase_id, &deleted_by)? {
            Some(record) => println!("Deleted audio {}", record.id),
            None => bail!(
                "No live audio for user {} and phrase {}",
                user_id,
                phrase_id
            ),
        },
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    if !cli_args.db_dir.is_dir() {
        bail!("Database directory does not exist: {:?}", cli_args.db_dir);
    }
    let db_path = cli_args.db_dir.join(AUDIO_DB_FILE_NAME);
    let store = SqliteAudioStore::open(&db_path)
        .with_context(|| format!("Failed to open audio database {:?}", db_path))?;

    execute(&store, cli_args.command)
}
