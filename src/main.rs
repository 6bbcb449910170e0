pub mod models {
    pub mod controme;
}

pub mod client;
pub mod config;
pub mod coordinator;
pub mod entities {
    pub mod climate;
    pub mod sensor;
}
pub mod normalize;

use crate::client::{ContromeApi, ContromeClient};
use crate::config::Config;
use crate::coordinator::UpdateCoordinator;
use crate::entities::climate::{
    ClimateEntity, MAX_TARGET_TEMP, MIN_TARGET_TEMP, TARGET_TEMP_STEP, build_climate_entities,
};
use crate::entities::sensor::{RoomSensor, build_room_sensors};
use crate::models::controme::{HouseId, RawHouse};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// Resolve the house id all API calls are scoped by: an explicit
/// configuration value wins, otherwise ask the controller. Ambiguity is a
/// setup error rather than a silent default.
fn resolve_house_id(cfg: &Config, client: &ContromeClient) -> Result<HouseId, String> {
    if let Some(id) = cfg.house_id {
        return Ok(id);
    }

    let houses = client
        .list_houses()
        .map_err(|e| format!("house discovery failed (set CONTROME_HOUSE_ID to skip): {}", e))?;
    select_house(&houses)
}

/// Pick the house from a discovery listing: exactly one candidate is
/// required, anything else is a setup error rather than a silent default.
fn select_house(houses: &[RawHouse]) -> Result<HouseId, String> {
    match houses {
        [] => Err("No houses reported by the controller".to_string()),
        [house] => {
            info!(
                "Discovered house {} ({})",
                house.id.0,
                house.name.as_deref().unwrap_or("-")
            );
            Ok(house.id)
        }
        many => {
            let listing = many
                .iter()
                .map(|h| format!("{} ({})", h.id.0, h.name.as_deref().unwrap_or("-")))
                .collect::<Vec<_>>()
                .join(", ");
            Err(format!(
                "Multiple houses found [{}]; set CONTROME_HOUSE_ID to pick one",
                listing
            ))
        }
    }
}

fn log_room_states(coordinator: &UpdateCoordinator, climates: &[ClimateEntity], sensors: &[RoomSensor]) {
    if let Some(snapshot) = coordinator.snapshot() {
        info!("Snapshot from {}", snapshot.taken_at.format("%H:%M:%S"));
    }
    for climate in climates {
        info!(
            "{}: current {} / target {} / mode {:?}{}",
            climate.name(),
            climate
                .current_temperature()
                .map(|v| format!("{:.1}°C", v))
                .unwrap_or_else(|| "-".to_string()),
            climate
                .target_temperature()
                .map(|v| format!("{:.1}°C", v))
                .unwrap_or_else(|| "-".to_string()),
            climate.hvac_mode(),
            if climate.available() { "" } else { " [unavailable]" },
        );
    }
    for sensor in sensors {
        if let Some(state) = sensor.state() {
            debug!(
                "{} = {}{}",
                sensor.name(),
                state,
                sensor.kind().unit().unwrap_or("")
            );
        }
    }
    let unavailable = sensors.iter().filter(|s| !s.available()).count();
    if unavailable > 0 {
        info!("{} of {} sensors unavailable", unavailable, sensors.len());
    }
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (base_url={}, house_id={}, poll_interval={}s)",
        cfg.base_url,
        cfg.house_id.map(|h| h.0.to_string()).unwrap_or_else(|| "<discover>".to_string()),
        cfg.poll_interval.as_secs()
    );

    // 2) Init client
    let client = ContromeClient::new(&cfg.base_url, cfg.user.clone(), cfg.password.clone());

    // 3) Resolve the house to poll
    let house = resolve_house_id(&cfg, &client)?;
    info!("Using house {}", house.0);

    // 4) Start the shared update coordinator (primes the cache)
    let api: Arc<dyn ContromeApi> = Arc::new(client);
    let coordinator = Arc::new(UpdateCoordinator::start(
        Arc::clone(&api),
        house,
        cfg.poll_interval,
    ));
    if coordinator.snapshot().is_none() {
        warn!("Initial poll failed; entities start unavailable until the controller answers");
    }

    // 5) Build the entity views over the snapshot
    let climates = build_climate_entities(&coordinator, &api, house);
    let sensors = build_room_sensors(&coordinator, house);
    info!(
        "Created {} climate zone(s) and {} sensor(s); setpoint range {}..={}°C, step {}",
        climates.len(),
        sensors.len(),
        MIN_TARGET_TEMP,
        MAX_TARGET_TEMP,
        TARGET_TEMP_STEP
    );
    for climate in &climates {
        debug!("climate {} (room {})", climate.unique_id(), climate.room_id().0);
    }

    // 6) Render state after every successful poll, for the life of the process
    let updates = coordinator.subscribe();
    log_room_states(&coordinator, &climates, &sensors);
    loop {
        match updates.recv() {
            Ok(()) => log_room_states(&coordinator, &climates, &sensors),
            Err(_) => return Err("update coordinator stopped unexpectedly".to_string()),
        }
    }
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);

        let Some((key, raw_value)) = assignment.split_once('=') else {
            return Err(format!("{}:{}: missing '=' in assignment", path.display(), index + 1));
        };
        let key = key.trim();
        if key.is_empty() || key.chars().any(|c| c.is_whitespace()) {
            return Err(format!(
                "{}:{}: invalid environment variable name `{}`",
                path.display(),
                index + 1,
                key
            ));
        }

        let value = raw_value
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();

        // Preserve any value that was already supplied via the process environment.
        if std::env::var_os(key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}


fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "controme-bridge {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
