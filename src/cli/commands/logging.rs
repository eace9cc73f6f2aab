use clap::{builder::ValueParser, Arg, ArgMatches, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ARG_LOG_FORMAT: &str = "log-format";

/// Output format of the fmt layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("HDNOTES_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long("log-format")
                .help("Log output format")
                .env("HDNOTES_LOG_FORMAT")
                .default_value("pretty")
                .value_parser(["pretty", "json"]),
        )
}

#[derive(Debug)]
pub struct Options {
    pub format: LogFormat,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let format = match matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self { format }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_flag_counts() {
        temp_env::with_vars([("HDNOTES_LOG_LEVEL", None::<&str>)], || {
            let command = with_args(Command::new("test"));
            let matches = command.get_matches_from(vec!["test", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn log_level_from_env() {
        temp_env::with_vars([("HDNOTES_LOG_LEVEL", Some("info"))], || {
            let command = with_args(Command::new("test"));
            let matches = command.get_matches_from(vec!["test"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(2));
        });
    }

    #[test]
    fn log_format_defaults_to_pretty() {
        temp_env::with_vars([("HDNOTES_LOG_FORMAT", None::<&str>)], || {
            let matches = with_args(Command::new("test")).get_matches_from(vec!["test"]);
            assert_eq!(Options::parse(&matches).format, LogFormat::Pretty);
        });
    }

    #[test]
    fn log_format_json() {
        let matches = with_args(Command::new("test"))
            .get_matches_from(vec!["test", "--log-format", "json"]);
        assert_eq!(Options::parse(&matches).format, LogFormat::Json);
    }

    #[test]
    fn log_level_rejects_unknown_names() {
        let parser = validator_log_level();
        let command = Command::new("test").arg(Arg::new("level").value_parser(parser));
        assert!(command.try_get_matches_from(vec!["test", "loud"]).is_err());
    }
}
