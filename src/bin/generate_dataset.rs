use std::path::PathBuf;

use floodcast::{
    assemble, generator_config_from_env, init_logging, log_app_start, log_run_finished,
    logging_config_from_env, AssembleRequest, DatasetMode, Persist,
};

const USAGE: &str = "usage: generate_dataset <train|predict> <start YYYY-MM-DD> <end YYYY-MM-DD> [output file]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 || args.len() > 4 {
        return Err(USAGE.into());
    }

    let mode = DatasetMode::parse(&args[0])?;
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg, mode.as_str(), &args[1], &args[2]);

    let cfg = generator_config_from_env();
    let persist = match args.get(3) {
        Some(path) => Persist::File(PathBuf::from(path)),
        None => Persist::Directory(cfg.output_dir.clone()),
    };
    let request = AssembleRequest {
        start_date: args[1].clone(),
        end_date: args[2].clone(),
        mode,
        persist,
    };

    let dataset = assemble(&request, &cfg)?;
    let columns = dataset.column_names().len();
    log_run_finished(dataset.len(), columns, dataset.persisted_to.as_deref());

    println!(
        "{} dataset | range={}..{} rows={} columns={} dropped={} output={}",
        dataset.mode,
        dataset.start_date,
        dataset.end_date,
        dataset.len(),
        columns,
        dataset.report.dropped_rows,
        dataset
            .persisted_to
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    Ok(())
}
