use std::fs::{create_dir, metadata};

use fern::{DateBased, Dispatch};
use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error(transparent)]
    LogError(#[from] log::SetLoggerError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Initializes the global `log` logger used across every FlowDrop crate.
///
/// When `path` is given, log lines are additionally appended to a
/// date-rotated file under that directory, on top of stdout.
pub fn init_logger(level: LevelFilter, path: Option<&str>) -> Result<(), LoggerInitError> {
    let mut logger = Dispatch::new()
        .level(level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{}] - ({}) - {}",
                record.level(),
                record.file_static().unwrap_or("*"),
                message
            ))
        })
        .chain(std::io::stdout());

    if let Some(path) = path {
        if metadata(path).is_err() {
            create_dir(path)?;
        }

        logger = logger.chain(DateBased::new(path, "%Y-%m-%d-flowdrop.log"))
    }

    logger.apply()?;
    Ok(())
}

pub fn enable_panic_logger() {
    std::panic::set_hook(Box::new(|info| {
        log::error!(
            "panic: location={:?}, message={:?}",
            info.location(),
            info.payload()
                .downcast_ref::<&str>()
                .map(|it| Some(it.to_string()))
                .unwrap_or_else(|| info.payload().downcast_ref::<String>().cloned())
        );
    }));
}
