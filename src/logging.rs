use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{runtime::ConfigErrors, Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid logging configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Could not install the logger: {0}")]
    Install(#[from] log::SetLoggerError),
}

/// Send log messages at `level` and above to stderr.
pub fn init_logging(level: log::LevelFilter) -> Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} [{l}])} {M} - {m}{n}",
        )))
        .target(Target::Stderr)
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))?;

    log4rs::init_config(config)?;
    Ok(())
}
