//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Args;
use tracing::info;

use livecap_core::audio::device::list_input_devices;
use livecap_core::audio::mic::MicSource;
use livecap_core::engine::registry::{self, Device, ParamValue};
use livecap_core::engine::{load_model, CancelToken, EngineHandle};
use livecap_core::file::{FileOptions, FilePipeline, VadSegmenter};
use livecap_core::translate::{create_translator, translator_registry, Translator};
use livecap_core::vad::processor::VadProcessor;
use livecap_core::vad::{registered_backends, BackendKind};
use livecap_core::{resources, StreamTranscriber, TranscriptEvent, VadConfig};

#[derive(Args)]
pub struct TranscribeArgs {
    /// Input media file (omit with --realtime).
    pub file: Option<PathBuf>,

    /// Subtitle output path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Stream from a capture device instead of a file.
    #[arg(long)]
    pub realtime: bool,

    /// Capture device index (see `livecap devices`).
    #[arg(long)]
    pub mic: Option<usize>,

    #[arg(long, default_value = "whisper")]
    pub engine: String,

    /// auto, gpu (alias for cuda), or cpu.
    #[arg(long, default_value = "auto")]
    pub device: String,

    #[arg(long, default_value = "en")]
    pub language: String,

    #[arg(long)]
    pub model_size: Option<String>,

    /// auto, silero, tenvad, or webrtc.
    #[arg(long, default_value = "auto")]
    pub vad: String,

    /// Translator id (see `livecap translators`).
    #[arg(long)]
    pub translate: Option<String>,

    #[arg(long)]
    pub target_lang: Option<String>,
}

pub fn info(as_json: bool, ensure_demux: bool) -> anyhow::Result<()> {
    let ffmpeg = resources::ffmpeg_executable();
    if ensure_demux {
        ffmpeg
            .as_ref()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("demux binary unavailable")?;
    }

    let engines: Vec<_> = registry::registry()
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "displayName": e.display_name,
                "deviceSupport": e.device_support,
                "streaming": e.streaming,
            })
        })
        .collect();
    let payload = serde_json::json!({
        "modelsDir": resources::models_dir(""),
        "cacheDir": resources::cache_dir(""),
        "ffmpeg": ffmpeg.as_ref().ok(),
        "gpuAvailable": gpu_available(),
        "vadBackends": registered_backends(),
        "engines": engines,
        "translators": translator_registry().iter().map(|t| t.id).collect::<Vec<_>>(),
    });

    if as_json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("models dir:  {}", resources::models_dir("").display());
        println!("cache dir:   {}", resources::cache_dir("").display());
        match &ffmpeg {
            Ok(path) => println!("ffmpeg:      {}", path.display()),
            Err(e) => println!("ffmpeg:      unavailable ({e})"),
        }
        println!("gpu:         {}", if gpu_available() { "available" } else { "not detected" });
        println!("vad:         {}", registered_backends().join(", "));
        println!("engines:");
        for e in registry::registry() {
            println!("  {}: {}", e.id, e.display_name);
        }
        println!("translators:");
        for t in translator_registry() {
            println!("  {}: {}", t.id, t.display_name);
        }
    }
    Ok(())
}

fn gpu_available() -> bool {
    // Conservative probe: the loader reports CUDA only when the driver is
    // actually present.
    std::path::Path::new("/proc/driver/nvidia/version").exists()
        || std::env::var_os("CUDA_VISIBLE_DEVICES").is_some()
}

pub fn devices() -> anyhow::Result<()> {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no capture devices found");
        return Ok(());
    }
    for d in devices {
        let default = if d.is_default { " (default)" } else { "" };
        println!("{}: {} [{} ch]{default}", d.index, d.name, d.channels);
    }
    Ok(())
}

pub fn engines() -> anyhow::Result<()> {
    for e in registry::registry() {
        let devices: Vec<String> = e.device_support.iter().map(|d| d.to_string()).collect();
        println!("{}: {} [{}]", e.id, e.display_name, devices.join(", "));
    }
    Ok(())
}

pub fn translators() -> anyhow::Result<()> {
    for t in translator_registry() {
        println!("{}: {}", t.id, t.display_name);
    }
    Ok(())
}

pub fn transcribe(args: TranscribeArgs) -> anyhow::Result<()> {
    let device: Device = args.device.parse()?;

    let mut overrides: Vec<(&str, ParamValue)> =
        vec![("language", ParamValue::from(args.language.as_str()))];
    if let Some(size) = &args.model_size {
        overrides.push(("model_size", ParamValue::from(size.as_str())));
    }

    let mut engine = registry::create_engine(&args.engine, device, &overrides)?;
    info!(engine = args.engine.as_str(), "loading model");
    load_model(
        engine.as_mut(),
        |update| eprintln!("[{:>3}%] {}", update.percent, update.message),
        &CancelToken::new(),
    )?;
    let handle = EngineHandle::from_boxed(engine);

    let translator: Option<Arc<dyn Translator>> = match &args.translate {
        Some(id) => Some(Arc::from(create_translator(id)?)),
        None => None,
    };
    if translator.is_some() && args.target_lang.is_none() {
        bail!("--translate requires --target-lang");
    }

    let result = if args.realtime {
        stream_from_mic(args, handle.clone(), translator)
    } else {
        process_file(args, handle.clone(), translator)
    };

    handle.0.lock().cleanup();
    result
}

fn stream_from_mic(
    args: TranscribeArgs,
    handle: EngineHandle,
    translator: Option<Arc<dyn Translator>>,
) -> anyhow::Result<()> {
    let backend: BackendKind = args.vad.parse()?;
    let processor = VadProcessor::with_backend_kind(backend, VadConfig::default())?;

    let mut builder = StreamTranscriber::builder(handle)
        .vad_processor(processor)
        .source_id("mic");
    if let (Some(translator), Some(target)) = (translator, &args.target_lang) {
        builder = builder.translator(translator, args.language.clone(), target.clone());
    }
    let mut transcriber = builder.build()?;

    let source = MicSource::new(args.mic);
    info!(device = ?args.mic, "streaming from microphone — ctrl-c to stop");

    for event in transcriber.transcribe_sync(source) {
        match event? {
            TranscriptEvent::Interim(interim) => {
                eprintln!("… {}", interim.text);
            }
            TranscriptEvent::Final(result) => {
                println!(
                    "[{:.2}s – {:.2}s] {}",
                    result.start_time_s, result.end_time_s, result.text
                );
                if let Some(translated) = &result.translated_text {
                    println!("  ⇒ {translated}");
                }
            }
        }
    }

    let snap = transcriber.diagnostics_snapshot();
    info!(
        chunks = snap.chunks_in,
        finals = snap.segments_final,
        interims = snap.segments_interim,
        engine_errors = snap.engine_errors,
        "session finished"
    );
    transcriber.close();
    Ok(())
}

fn process_file(
    args: TranscribeArgs,
    handle: EngineHandle,
    translator: Option<Arc<dyn Translator>>,
) -> anyhow::Result<()> {
    let Some(input) = &args.file else {
        bail!("transcribe requires a file (or --realtime with --mic)");
    };
    let backend: BackendKind = args.vad.parse()?;
    let processor = VadProcessor::with_backend_kind(backend, VadConfig::default())?;

    let mut pipeline = FilePipeline::new(
        Box::new(livecap_core::file::AutoDemuxer),
        Box::new(VadSegmenter::new(processor)),
    );

    let write_translated = translator.is_some();
    let options = FileOptions {
        translator,
        source_lang: Some(args.language.clone()),
        target_lang: args.target_lang.clone(),
        translation_timeout: Some(resources::translation_timeout()),
        write_subtitles: true,
        write_translated_subtitles: write_translated,
        output_path: args.output.clone(),
    };

    let mut transcriber = |audio: &[f32], sr: u32| handle.0.lock().transcribe(audio, sr);
    let result = pipeline.process_file(input, &mut transcriber, &options)?;

    println!(
        "{} segments from {}",
        result.subtitles.len(),
        input.display()
    );
    if let Some(path) = &result.output_path {
        println!("wrote {}", path.display());
    }
    if let Some(path) = &result.translated_output_path {
        println!("wrote {}", path.display());
    }
    Ok(())
}
