use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use polars::prelude::*;

use panelscreen::model::{taxon_frame, SummaryRecord};
use panelscreen::store::SubmissionFilter;
use panelscreen::summary::ReadChart;
use panelscreen::{open_local_session, screen, ExportFormat, LocalSession, PipelineConfig, Refresh, ScreenMode, SubmissionStatus};

/// panelscreen CLI
#[derive(Parser)]
#[command(name = "panelscreen")]
#[command(version)]
#[command(about = "Merge pathogen detection outputs across submissions and screen them against panels", long_about = None)]
struct Cli {
    /// Submission manifest (JSON)
    #[arg(long, global = true, default_value = "manifest.json")]
    manifest: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pathogen taxonomy feed (overrides config)
    #[arg(long, global = true)]
    pathogen_feed: Option<String>,

    /// Panel feed (overrides config)
    #[arg(long, global = true)]
    panel_feed: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Selected {
    /// Submission ids or names, in merge order
    #[arg(required = true, value_delimiter = ',')]
    submissions: Vec<String>,
}

#[derive(Args)]
struct Output {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
    /// Export into this directory (the merged table; the screened rows for `screen`)
    #[arg(long)]
    export: Option<PathBuf>,
    /// Export format (csv, tsv, parquet)
    #[arg(long, default_value = "tsv")]
    format: ExportFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// List submissions in the manifest
    Submissions {
        /// Only this status (e.g. "completed")
        #[arg(long)]
        status: Option<SubmissionStatus>,
        /// Only names containing this text
        #[arg(long)]
        name: Option<String>,
    },

    /// List panels and their pathogens
    Panels,

    /// Merge long-format outputs of the selected submissions
    Merge {
        #[command(flatten)]
        selected: Selected,
        #[command(flatten)]
        output: Output,
    },

    /// Merge, then screen against a panel or explicit pathogens
    Screen {
        #[command(flatten)]
        selected: Selected,
        /// Panel name
        #[arg(long)]
        panel: Option<String>,
        /// Comma-separated taxonomy ids (replace the panel's pathogens)
        #[arg(long, value_delimiter = ',')]
        pathogens: Vec<String>,
        /// detected or screened (default from config)
        #[arg(long)]
        mode: Option<ScreenMode>,
        /// Ignore the pathogen selection
        #[arg(long)]
        show_all: bool,
        /// Keep only the N most abundant taxa per sample
        #[arg(long)]
        top: Option<usize>,
        #[command(flatten)]
        output: Output,
    },

    /// Merge summary statistics and report read-count charts
    Summary {
        #[command(flatten)]
        selected: Selected,
        #[command(flatten)]
        output: Output,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    panelscreen::logging::init(cli.verbose);

    let mut config = match &cli.config {
        Some(p) => PipelineConfig::from_json(p)?,
        None => PipelineConfig::default(),
    };
    if let Some(f) = cli.pathogen_feed {
        config.pathogen_feed = Some(f);
    }
    if let Some(f) = cli.panel_feed {
        config.panel_feed = Some(f);
    }

    let mut session = open_local_session(config, &cli.manifest).await?;

    match cli.command {
        Commands::Submissions { status, name } => {
            let filter = SubmissionFilter { status, name_contains: name };
            cmd_submissions(&session, &filter).await?;
        }

        Commands::Panels => cmd_panels(&session),

        Commands::Merge { selected, output } => {
            select(&mut session, &selected).await?;
            expect_committed(&session, session.refresh_insights().await)?;
            let rows = session.insights().map(|v| v.rows.clone()).unwrap_or_default();
            if output.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_frame(taxon_frame(&rows)?);
            }
            export(&session, &output, false).await?;
        }

        Commands::Screen { selected, panel, pathogens, mode, show_all, top, output } => {
            select(&mut session, &selected).await?;
            if let Some(p) = &panel {
                if !session.select_panel(Some(p.as_str())) {
                    bail!("Unknown panel: {}", p);
                }
            }
            if !pathogens.is_empty() {
                session.select_pathogen_ids(&pathogens);
            }
            if let Some(m) = mode {
                session.selection_mut().set_mode(m);
            }
            session.selection_mut().set_show_all_pathogens(show_all);

            expect_committed(&session, session.refresh_insights().await)?;
            let mut rows = session.visible_rows()?;
            if let Some(n) = top {
                rows = screen::top_taxa(&rows, n);
            }
            if output.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_frame(taxon_frame(&rows)?);
            }
            if let Some(dir) = export_dir(&output)? {
                let path = session.export_screened(&rows, output.format, Some(dir))?;
                eprintln!("exported: {}", path.display());
            }
        }

        Commands::Summary { selected, output } => {
            select(&mut session, &selected).await?;
            expect_committed(&session, session.refresh_summary().await)?;
            let records = session.summary_records();
            let chart = session.summary_chart();
            if output.json {
                let body = serde_json::json!({ "records": records, "chart": chart });
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_frame(summary_frame(&records)?);
                print_chart(&chart);
            }
            export(&session, &output, true).await?;
        }
    }

    print_notices(&session);
    Ok(())
}

fn print_notices(session: &LocalSession) {
    for notice in session.take_notices() {
        eprintln!("[{:?}] {}", notice.pipeline, notice.message);
    }
}

async fn select(session: &mut LocalSession, selected: &Selected) -> Result<()> {
    let n = session.select_submission_ids(&selected.submissions).await?;
    if n == 0 {
        bail!("None of the given submissions is completed");
    }
    Ok(())
}

fn expect_committed(session: &LocalSession, outcome: Refresh) -> Result<()> {
    print_notices(session);
    match outcome {
        Refresh::Committed { .. } => Ok(()),
        Refresh::Pending { .. } => bail!("No matching outputs are available for the selected submissions yet"),
        Refresh::Failed { .. } => bail!("Merge failed; see notices above"),
        Refresh::Superseded { .. } => bail!("Merge superseded by a newer request"),
    }
}

fn export_dir(output: &Output) -> Result<Option<&Path>> {
    let Some(dir) = &output.export else {
        return Ok(None);
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(Some(dir.as_path()))
}

async fn export(session: &LocalSession, output: &Output, summary: bool) -> Result<()> {
    let Some(dir) = export_dir(output)? else {
        return Ok(());
    };
    let path = if summary {
        session.export_summary(output.format, Some(dir)).await?
    } else {
        session.export_insights(output.format, Some(dir)).await?
    };
    eprintln!("exported: {}", path.display());
    Ok(())
}

async fn cmd_submissions(session: &LocalSession, filter: &SubmissionFilter) -> Result<()> {
    let subs = session.list_submissions(filter).await?;
    let df = df!(
        "id" => subs.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
        "name" => subs.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
        "status" => subs.iter().map(|s| s.status.to_string()).collect::<Vec<_>>(),
        "workflow" => subs.iter().map(|s| s.workflow_ref.clone()).collect::<Vec<_>>(),
    )?;
    print_frame(df);
    Ok(())
}

fn cmd_panels(session: &LocalSession) {
    let catalog = session.catalog();
    for panel in catalog.panels() {
        println!("{} ({} pathogens)", panel.name, panel.pathogen_ids.len());
        for p in catalog.on_panel_change(panel) {
            println!("  {}\t{}", p.id, p.name);
        }
    }
}

fn summary_frame(records: &[SummaryRecord]) -> PolarsResult<DataFrame> {
    df!(
        "sample_name" => records.iter().map(|r| r.sample_name.clone()).collect::<Vec<_>>(),
        "total_sequences" => records.iter().map(|r| r.total_sequences).collect::<Vec<_>>(),
        "classified_reads" => records.iter().map(|r| r.classified_reads).collect::<Vec<_>>(),
        "unclassified_reads" => records.iter().map(|r| r.unclassified_reads).collect::<Vec<_>>(),
        "percentage_classified" => records.iter().map(|r| r.percentage_classified).collect::<Vec<_>>(),
        "submission" => records.iter().map(|r| r.submission.clone()).collect::<Vec<_>>(),
    )
}

fn print_chart(chart: &ReadChart) {
    match chart {
        ReadChart::None => println!("chart: none (no samples)"),
        ReadChart::Radial(r) => println!(
            "chart: radial {}: classified={} unclassified={} total={}",
            r.sample_name, r.classified_reads, r.unclassified_reads, r.total
        ),
        ReadChart::Bar { groups } => {
            println!("chart: grouped bars");
            for g in groups {
                println!("  {}\tclassified={}\tunclassified={}", g.sample_name, g.classified_reads, g.unclassified_reads);
            }
        }
    }
}

fn print_frame(df: DataFrame) {
    // Read by the polars pretty-printer (fmt feature).
    std::env::set_var("POLARS_FMT_TABLE_FORMATTING", "UTF8_FULL");
    std::env::set_var("POLARS_FMT_MAX_COLS", "100000");
    std::env::set_var("POLARS_FMT_MAX_ROWS", "1000000");
    std::env::set_var("POLARS_FMT_STR_LEN", "100000");
    std::env::set_var("POLARS_TABLE_WIDTH", "65535");
    println!("{}", df);
}
