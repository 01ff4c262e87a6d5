use std::io::Write;

use env_logger::Env;

/// Installs the process logger. `WEFT_LOG` takes `RUST_LOG`-style filters.
pub fn init_logging() {
    let env = Env::new()
        .filter_or("WEFT_LOG", "info")
        .write_style("WEFT_LOG_STYLE");
    env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(
                buf,
                "[{} {style}{level:<5}{style:#} {}] {}",
                buf.timestamp_millis(),
                record.target(),
                record.args()
            )
        })
        .init();
}
