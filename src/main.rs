use clap::{CommandFactory, Parser};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use livetab::source::MarkupRenderer;
use livetab::{
    init_cache, user_message_from_io, user_message_from_report, AppConfig, Args, CacheRegistry,
    ConfigManager, HeaderPolicy, MacroParameters, PayloadCodec, Query, Session, APP_NAME,
};
use livetab_cli::{Command, QueryArgs, RenderArgs, ServeArgs};
use serde::Serialize;
use std::io::{self, Read};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.generate_config {
        let config_manager = ConfigManager::new(APP_NAME)?;
        let path = config_manager.write_default_config(args.force)?;
        println!("Default configuration written to {}", path.display());
        return Ok(Some(()));
    }

    Ok(None)
}

/// Log to stderr; RUST_LOG wins over --debug, which wins over [logging] level.
fn init_logging(config: &AppConfig, debug: bool) {
    let level = if debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        let context = format!("Could not read {}.", path.display());
        eyre!("{}", user_message_from_io(&e, Some(&context)))
    })
}

fn read_document(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut content = String::new();
        io::stdin().read_to_string(&mut content)?;
        return Ok(content);
    }
    read_file(path)
}

fn codec(compression: Option<livetab::CompressionFormat>, config: &AppConfig) -> Result<PayloadCodec> {
    let compression = match compression {
        Some(format) => format,
        None => config.payload.compression_format()?,
    };
    Ok(PayloadCodec::new(compression))
}

fn render_params(args: &RenderArgs, config: &AppConfig) -> Result<MacroParameters> {
    Ok(MacroParameters {
        id: args.id.clone(),
        header_detection: match args.header_detection {
            Some(detection) => HeaderPolicy::from(detection),
            None => config.table.header_policy()?,
        },
        header: args.header.clone(),
        date_formats: args.date_formats.clone(),
        date_formats_separator: args
            .date_formats_separator
            .clone()
            .unwrap_or_else(|| config.table.date_formats_separator.clone()),
        sorting: config.table.sorting && !args.no_sorting,
        filtering: config.table.filtering && !args.no_filtering,
        default_date_formats: config.table.date_formats.clone(),
    })
}

fn run_render(args: &RenderArgs, config: &AppConfig) -> Result<()> {
    let content = read_document(&args.path)?;
    // A one-shot process has no cache to share, so the payload is inlined.
    let session = Session::new(
        MarkupRenderer::new()?,
        codec(args.compression, config)?,
        None,
        config.query.default_limit,
    );
    let view = session.render(&content, &render_params(args, config)?)?;
    print_json(&view, args.pretty)
}

fn run_query(args: &QueryArgs, config: &AppConfig) -> Result<()> {
    let query = match &args.query_json {
        Some(path) => {
            let json = read_file(path)?;
            let mut query = Query::from_json(&json)?;
            if let Some(offset) = args.offset {
                query.offset = offset;
            }
            if args.limit.is_some() {
                query.limit = args.limit;
            }
            query
        }
        None => Query::from_expressions(
            &args.filter,
            &args.sort,
            args.offset.unwrap_or(0),
            args.limit,
        )?,
    };
    let session = Session::new(
        MarkupRenderer::new()?,
        PayloadCodec::default(),
        None,
        config.query.default_limit,
    );
    let result = session.query(&args.entries, args.fields.as_deref(), &query)?;
    print_json(&result, args.pretty)
}

fn run_serve(args: &ServeArgs, config: &AppConfig) -> Result<()> {
    let registry = CacheRegistry::new();
    let cache = if config.cache.enabled && !args.no_cache {
        Some(init_cache(&registry, &config.cache.settings())?)
    } else {
        None
    };
    let session = Session::new(
        MarkupRenderer::new()?,
        codec(args.compression, config)?,
        cache,
        config.query.default_limit,
    )
    .with_date_formats(config.table.date_formats.clone());

    info!("serving requests on stdin");
    session.run(io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}

fn run(args: &Args, config: &AppConfig) -> Result<()> {
    match &args.command {
        Some(Command::Render(render)) => run_render(render, config),
        Some(Command::Query(query)) => run_query(query, config),
        Some(Command::Serve(serve)) => run_serve(serve, config),
        None => {
            Args::command().print_help()?;
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    color_eyre::install()?;

    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }

    let config = AppConfig::load(APP_NAME)?;
    init_logging(&config, args.debug);

    if let Err(report) = run(&args, &config) {
        eprintln!("Error: {}", user_message_from_report(&report));
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_args(extra: &[&str]) -> RenderArgs {
        let mut argv = vec!["livetab", "render", "doc.txt"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).expect("valid arguments").command {
            Some(Command::Render(args)) => args,
            other => panic!("expected render command, got {:?}", other),
        }
    }

    #[test]
    fn test_render_params_follow_config() {
        let mut config = AppConfig::default();
        config.table.header_detection = "keep".to_string();
        config.table.sorting = false;
        config.table.date_formats = vec!["%Y".to_string()];
        let params = render_params(&render_args(&[]), &config).unwrap();
        assert_eq!(params.header_detection, HeaderPolicy::Keep);
        assert!(!params.sorting);
        assert!(params.filtering);
        assert_eq!(params.default_date_formats, vec!["%Y".to_string()]);
    }

    #[test]
    fn test_render_flags_override_config() {
        let config = AppConfig::default();
        let params = render_params(
            &render_args(&[
                "--header-detection",
                "ignore",
                "--no-filtering",
                "--date-formats-separator",
                ";",
                "--id",
                "t",
            ]),
            &config,
        )
        .unwrap();
        assert_eq!(params.header_detection, HeaderPolicy::Ignore);
        assert!(!params.filtering);
        assert_eq!(params.date_formats_separator, ";");
        assert_eq!(params.id.as_deref(), Some("t"));
    }

    #[test]
    fn test_read_failure_names_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.txt");
        let err = read_document(&path).unwrap_err();
        let msg = user_message_from_report(&err);
        assert!(msg.contains("not found"), "got: {}", msg);
        assert!(msg.contains("missing.txt"), "got: {}", msg);
    }

    #[test]
    fn test_codec_from_config() {
        let mut config = AppConfig::default();
        config.payload.compression = "xz".to_string();
        assert_eq!(
            codec(None, &config).unwrap().compression(),
            livetab::CompressionFormat::Xz
        );
        assert_eq!(
            codec(Some(livetab::CompressionFormat::Zstd), &config)
                .unwrap()
                .compression(),
            livetab::CompressionFormat::Zstd
        );
    }
}
