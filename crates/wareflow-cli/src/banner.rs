use std::path::Path;

use wareflow_config::AppConfig;

const WIDTH: usize = 70;
const LEFT_W: usize = 33;

/// Print the startup banner with the database and backup summary.
pub fn print_banner(config: &AppConfig, config_dir: &Path, schema_version: Option<i64>) {
    for line in render(config, config_dir, schema_version) {
        println!("{line}");
    }
}

fn home_relative(path: &Path) -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => path.to_string_lossy().replace(&home, "~"),
        _ => path.to_string_lossy().to_string(),
    }
}

/// Keep the tail of `s` so it fits in `width` characters.
fn fit(s: &str, width: usize) -> String {
    let len = s.chars().count();
    if len <= width {
        return s.to_string();
    }
    let tail: String = s.chars().skip(len - width + 1).collect();
    format!("…{tail}")
}

fn render(config: &AppConfig, config_dir: &Path, schema_version: Option<i64>) -> Vec<String> {
    let version = env!("CARGO_PKG_VERSION");
    let right_w = WIDTH - LEFT_W - 6; // 6 for "│ ", "│  " and "│"

    let database = home_relative(&config.resolve_database_path(config_dir));
    let schema = match schema_version {
        Some(v) => format!("v{v}"),
        None => "not recorded".to_string(),
    };
    let backups = if config.backup.enabled {
        let keep = match config.backup.max_backups {
            0 => "all".to_string(),
            n => n.to_string(),
        };
        format!("daily {}, keep {keep}", config.backup.backup_time)
    } else {
        "disabled".to_string()
    };
    let migrate = if config.database.auto_migrate {
        "automatic"
    } else {
        "manual"
    };
    let dir_display = home_relative(config_dir);

    let title = format!("Wareflow EMS v{version}");
    let title_dashes = WIDTH - 2 - title.chars().count() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(WIDTH - 2));

    let row = |l: &str, r: &str| {
        format!(
            "│ {:<LEFT_W$}│  {:<right_w$}│",
            fit(l, LEFT_W),
            fit(r, right_w)
        )
    };

    vec![
        top,
        row("", ""),
        row("  Employee management storage", "Database"),
        row("", &database),
        row("     ______________", &"─".repeat(right_w - 2)),
        row("    |  __    __    |", &format!("{:<10}{schema}", "Schema")),
        row("    | |__|  |__|   |", &format!("{:<10}{migrate}", "Migrate")),
        row("    |______________|", &format!("{:<10}{backups}", "Backups")),
        row("", ""),
        row(&format!("  {dir_display}"), "Press Ctrl+C to stop"),
        row("", ""),
        bottom,
    ]
}
