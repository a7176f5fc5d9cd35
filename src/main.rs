use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use tagsafe_translator::backend::{MtClient, MtEndpoint, PassthroughTranslator, SegmentTranslator};
use tagsafe_translator::config::{
    find_default_config, init_default_config, load_config, AppConfig,
};
use tagsafe_translator::docx::normalize::NormalizeOptions;
use tagsafe_translator::docx::package::DocPackage;
use tagsafe_translator::docx::translate::{DocTranslator, Strategy, TranslateOptions};
use tagsafe_translator::docx::xml::{parse_part, write_part};
use tagsafe_translator::progress::ConsoleProgress;
use tagsafe_translator::protect::{protect, repair_spacing, restore};

#[derive(Parser, Debug)]
#[command(name = "tagsafe-translator")]
#[command(about = "Document translator for remote MT backends with markup protection", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file with --init-config
    #[arg(long)]
    force: bool,

    /// Input .docx
    #[arg(value_name = "DOCX")]
    input: Option<PathBuf>,

    /// Output .docx (default: <input_stem>-<target_lang>.docx)
    #[arg(short, long, value_name = "DOCX")]
    output: Option<PathBuf>,

    /// Config file path (default: search for tagsafe-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine name from config (default: first configured engine)
    #[arg(long)]
    engine: Option<String>,

    /// Backend base URL (overrides the configured engine)
    #[arg(long)]
    base_url: Option<String>,

    /// Source language code sent to the backend (e.g. en-US)
    #[arg(long)]
    source_lang: Option<String>,

    /// Target language code sent to the backend (e.g. es-ES)
    #[arg(long)]
    target_lang: Option<String>,

    /// Segmentation strategy: segments | chunks
    #[arg(long)]
    strategy: Option<String>,

    /// Translate a text snippet to stdout instead of a file
    #[arg(long, value_name = "TEXT")]
    text: Option<String>,

    /// Merge redundant runs only; no translation
    #[arg(long)]
    clean_only: bool,

    /// Only parse + re-serialize the docx (no translation)
    #[arg(long)]
    roundtrip_only: bool,

    /// List configured engines, then exit
    #[arg(long)]
    list_engines: bool,

    /// Backend request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Suppress progress output
    #[arg(long)]
    quiet: bool,
}

fn load_effective_config(args: &Args) -> anyhow::Result<AppConfig> {
    let path = match args.config.clone() {
        Some(p) => Some(p),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            find_default_config(&cwd)
        }
    };
    match path {
        Some(p) => load_config(&p),
        None => Ok(AppConfig::default()),
    }
}

fn translate_options(cfg: &AppConfig, strategy: Strategy) -> anyhow::Result<TranslateOptions> {
    Ok(TranslateOptions {
        strategy,
        strictness: cfg.protection.strictness(),
        normalize: NormalizeOptions {
            merge_whitespace_only: cfg.cleanup.merge_whitespace_only,
            tracked: cfg.cleanup.tracked_attrs()?,
        },
        delimiters: cfg.protection.delimiter_chars(),
        ..TranslateOptions::default()
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", path.display());
        return Ok(());
    }

    let cfg = load_effective_config(&args)?;

    if args.list_engines {
        if cfg.engines.is_empty() {
            eprintln!("no engines configured");
        }
        for engine in &cfg.engines {
            println!(
                "{}\t{}\t{} -> {}",
                engine.name, engine.base_url, engine.source_lang, engine.target_lang
            );
        }
        return Ok(());
    }

    // Engine resolution is lazy: cleaning and roundtrip modes never need one.
    let resolve_engine = |args: &Args| -> anyhow::Result<(MtEndpoint, Duration)> {
        let (base_url, source_lang, target_lang, timeout) = match args.base_url.clone() {
            Some(url) => (
                url,
                args.source_lang.clone().unwrap_or_else(|| "en-US".to_string()),
                args.target_lang.clone().unwrap_or_else(|| "es-ES".to_string()),
                args.timeout_secs,
            ),
            None => {
                let engine = cfg.engine(args.engine.as_deref())?;
                (
                    engine.base_url.clone(),
                    args.source_lang.clone().unwrap_or_else(|| engine.source_lang.clone()),
                    args.target_lang.clone().unwrap_or_else(|| engine.target_lang.clone()),
                    args.timeout_secs.or(engine.timeout_secs),
                )
            }
        };
        Ok((
            MtEndpoint {
                base_url,
                source_lang,
                target_lang,
            },
            Duration::from_secs(timeout.unwrap_or(30)),
        ))
    };

    let strategy = {
        let name = args.strategy.clone().or_else(|| {
            cfg.engine(args.engine.as_deref())
                .ok()
                .and_then(|e| e.strategy.clone())
        });
        match name.as_deref() {
            Some(n) => Strategy::from_name(n)
                .ok_or_else(|| anyhow::anyhow!("unknown strategy: {n} (segments|chunks)"))?,
            None => Strategy::default(),
        }
    };

    if let Some(text) = args.text.as_deref() {
        let (endpoint, timeout) = resolve_engine(&args)?;
        let client = MtClient::new(endpoint, timeout).context("build MT client")?;
        let opts = translate_options(&cfg, strategy)?;
        let protected = protect(text, opts.strictness);
        let translated_core = if protected.core.trim().is_empty() {
            protected.core.clone()
        } else {
            client
                .translate_segment(&protected.core)
                .context("translate text")?
        };
        let out = repair_spacing(text, &restore(&protected, &translated_core), &opts.delimiters);
        println!("{out}");
        return Ok(());
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  tagsafe-translator <input.docx>\n\nTIPS:\n  - Run --init-config to create tagsafe-translator.toml with engine endpoints.\n  - Use --clean-only to merge redundant runs without translating.\n"
            );
            return Ok(());
        }
    };

    if args.roundtrip_only {
        let output = args.output.clone().unwrap_or_else(|| {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
            input.with_file_name(format!("{stem}-roundtrip.docx"))
        });
        let pkg = DocPackage::read(&input)?;
        let mut replacements = std::collections::HashMap::new();
        for ent in pkg.xml_entries() {
            if ent.data.is_empty() {
                continue;
            }
            let part = parse_part(&ent.name, &ent.data)
                .with_context(|| format!("parse xml: {}", ent.name))?;
            replacements.insert(ent.name.clone(), write_part(&part));
        }
        pkg.write(&output, &replacements)?;
        return Ok(());
    }

    let opts = translate_options(&cfg, strategy)?;

    if args.clean_only {
        let output = args.output.clone().unwrap_or_else(|| {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
            input.with_file_name(format!("{stem}-clean.docx"))
        });
        let backend = PassthroughTranslator;
        let translator = DocTranslator::new(&backend, opts, &progress);
        translator.clean_docx(&input, &output)?;
        return Ok(());
    }

    let (endpoint, timeout) = resolve_engine(&args)?;
    let output = args.output.clone().unwrap_or_else(|| {
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
        input.with_file_name(format!("{stem}-{}.docx", endpoint.target_lang))
    });
    let client = MtClient::new(endpoint, timeout).context("build MT client")?;
    let translator = DocTranslator::new(&client, opts, &progress);
    translator.translate_docx(&input, &output)?;
    Ok(())
}
