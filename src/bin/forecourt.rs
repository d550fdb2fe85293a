use clap::Parser;
use forecourt::{
    analyzer::{Analyzer, OutputDirs},
    cli::{AnalysisArgs, Cli, Command, run_enhance, run_enhance_record, run_record_command},
    init_logging,
    store::JsonRecordStore,
    video::list_video_inputs,
    worker::{AnalysisJob, AnalysisQueue},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let mut args = Cli::parse();
    let _guard = init_logging(args.log_level, &mut args.log_path)?;

    match &args.command {
        Command::Analyze {
            video_id,
            path,
            analysis,
        } => analyze(video_id, path, analysis, &args.store),
        Command::AnalyzeAll { dir, analysis } => analyze_all(dir, analysis, &args.store),
        Command::Enhance {
            image,
            mode,
            output,
            overwrite,
        } => {
            let target = run_enhance(image, *mode, output.as_deref(), *overwrite)?;
            println!("{}", target.display());
            Ok(())
        }
        Command::EnhanceRecord {
            video_id,
            vehicle_index,
            output_dir,
            mode,
            save,
        } => {
            let store = JsonRecordStore::open(&args.store)?;
            let written = run_enhance_record(
                &store,
                &OutputDirs::under(output_dir),
                video_id,
                *vehicle_index,
                *mode,
                *save,
            )?;
            for path in written {
                println!("{}", path.display());
            }
            Ok(())
        }
        command => {
            let mut store = JsonRecordStore::open(&args.store)?;
            run_record_command(command, &mut store, &mut std::io::stdout().lock())?;
            Ok(())
        }
    }
}

fn analyze(
    video_id: &str,
    path: &Path,
    analysis: &AnalysisArgs,
    store_path: &Path,
) -> anyhow::Result<()> {
    analysis.print_config();
    let mut store = JsonRecordStore::open(store_path)?;
    let mut analyzer = Analyzer::new(
        analysis.analysis_config(),
        analysis.engines()?,
        analysis.output_dirs(),
    );
    let response = analyzer.analyze_path(video_id, path, analysis.fps, &mut store)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn analyze_all(dir: &Path, analysis: &AnalysisArgs, store_path: &Path) -> anyhow::Result<()> {
    let inputs = list_video_inputs(dir)?;
    if inputs.is_empty() {
        info!(?dir, "No videos to analyze");
        return Ok(());
    }
    analysis.print_config();
    let analyzer = Analyzer::new(
        analysis.analysis_config(),
        analysis.engines()?,
        analysis.output_dirs(),
    );
    let queue = AnalysisQueue::spawn(analyzer, Box::new(JsonRecordStore::open(store_path)?))?;

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let (mut vehicles, mut failed) = (0, 0);
    for (video_id, path) in inputs {
        pb.set_message(video_id.clone());
        match queue.analyze(AnalysisJob {
            video_id: video_id.clone(),
            path,
            fps_override: analysis.fps,
        })? {
            Ok(response) => vehicles += response.summary.vehicles_detected,
            Err(e) => {
                error!(%video_id, error = %e, "Video analysis failed");
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("All videos analyzed");
    queue.shutdown()?;

    println!("Vehicles detected: {vehicles}, failed videos: {failed}");
    Ok(())
}
