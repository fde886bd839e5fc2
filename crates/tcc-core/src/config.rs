use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{engine::CloneSettings, errors::Error, Result};

/// Typed configuration, read from the environment.
///
/// `config.env` and `.env` in the working directory are loaded first when
/// present; they never override variables that are already set.
#[derive(Clone, Debug)]
pub struct Config {
    // Bot API
    pub bot_token: String,
    pub allowed_users: Vec<i64>,
    pub admin_id: Option<i64>,

    // MTProto user accounts
    pub api_id: i32,
    pub api_hash: String,

    // Storage
    pub data_dir: PathBuf,
    pub store_path: PathBuf,
    pub session_dir: PathBuf,

    // Health endpoint
    pub port: u16,

    // Cloning / login behaviour
    pub clone: CloneSettings,
    pub login_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new("config.env"));
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;

        let api_id = match env_str("API_ID").and_then(non_empty) {
            Some(raw) => raw.trim().parse::<i32>().map_err(|_| {
                Error::Config(format!("API_ID must be a number, got {raw:?}"))
            })?,
            None => {
                return Err(Error::Config(
                    "API_ID environment variable is required".to_string(),
                ))
            }
        };
        let api_hash = env_str("API_HASH").and_then(non_empty).ok_or_else(|| {
            Error::Config("API_HASH environment variable is required".to_string())
        })?;

        let allowed_users = parse_csv_i64(env_str("ALLOWED_USERS"));
        let admin_id = env_str("ADMIN_ID").and_then(|s| s.trim().parse::<i64>().ok());

        let data_dir = env_path("DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));
        let store_path = env_path("STORE_PATH").unwrap_or_else(|| data_dir.join("store.json"));
        let session_dir = data_dir.join("sessions");
        fs::create_dir_all(&session_dir)?;

        let port = env_u16("PORT").unwrap_or(8080);

        let defaults = CloneSettings::default();
        let clone = CloneSettings {
            item_delay: env_u64("CLONE_ITEM_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.item_delay),
            progress_every: env_usize("CLONE_PROGRESS_EVERY")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.progress_every),
            page_size: env_usize("CLONE_PAGE_SIZE")
                .map(|n| n.clamp(1, 100))
                .unwrap_or(defaults.page_size),
            max_rate_limit_retries: env_u32("CLONE_MAX_RATE_LIMIT_RETRIES"),
        };

        let login_timeout = Duration::from_secs(env_u64("LOGIN_TIMEOUT_SECS").unwrap_or(600));

        Ok(Self {
            bot_token,
            allowed_users,
            admin_id,
            api_id,
            api_hash,
            data_dir,
            store_path,
            session_dir,
            port,
            clone,
            login_timeout,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let Some((key, val)) = parse_dotenv_line(raw) else {
            continue;
        };
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv_line(raw: &str) -> Option<(&str, String)> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (k, v) = line.split_once('=')?;
    let key = k.trim().trim_start_matches("export ").trim();
    if key.is_empty() {
        return None;
    }

    let mut val = v.trim().to_string();
    // Strip optional surrounding quotes.
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        val = val[1..val.len() - 1].to_string();
    }
    Some((key, val))
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_u16(key: &str) -> Option<u16> {
    env_str(key).and_then(|s| s.trim().parse::<u16>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_lines() {
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("   "), None);
        assert_eq!(parse_dotenv_line("novalue"), None);
        assert_eq!(
            parse_dotenv_line("API_HASH = \"abc def\""),
            Some(("API_HASH", "abc def".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("export PORT='9000'"),
            Some(("PORT", "9000".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("BOT_TOKEN=1:a=b"),
            Some(("BOT_TOKEN", "1:a=b".to_string()))
        );
    }

    #[test]
    fn csv_ids_skip_garbage() {
        assert_eq!(
            parse_csv_i64(Some(" 1, x ,,-5 ".to_string())),
            vec![1, -5]
        );
        assert!(parse_csv_i64(None).is_empty());
    }
}
