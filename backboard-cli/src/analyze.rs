//! backboard-analyze - compute and print concept and cluster insights
//!
//! `--lecture` prints per-concept struggle insights for one lecture;
//! `--course` assigns every active student to a behavioral cluster and
//! prints the per-cluster rollup. Both are recomputed from the stored
//! timelines on every run.

use anyhow::{bail, Context, Result};
use backboard_core::analytics::concepts::rank_by_struggle;
use backboard_core::analytics::{aggregate, assign_cluster, rollup, CancelToken};
use backboard_core::types::{ClusterInsight, ConceptInsight, Lecture};
use backboard_core::{ClusterAssignment, Config, Database, StudentFeatures, TimelineStore};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backboard-analyze")]
#[command(about = "Compute concept and cluster insights from stored timelines")]
#[command(version)]
struct Args {
    /// Analyze one lecture: per-concept struggle insights
    #[arg(long, conflicts_with = "course")]
    lecture: Option<String>,

    /// Analyze one course: behavioral cluster rollups
    #[arg(long)]
    course: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// Database path (defaults to the XDG data dir)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LectureReport {
    lecture_id: String,
    title: String,
    students: usize,
    concepts: Vec<ConceptInsight>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseReport {
    course_id: String,
    students: usize,
    clusters: Vec<ClusterInsight>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        backboard_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    match (&args.lecture, &args.course) {
        (Some(lecture_id), _) => analyze_lecture(&db, &config, lecture_id, args.format),
        (None, Some(course_id)) => analyze_course(&db, &config, course_id, args.format),
        (None, None) => bail!("pass --lecture <id> or --course <id>"),
    }
}

fn analyze_lecture(db: &Database, config: &Config, lecture_id: &str, format: Format) -> Result<()> {
    let Some(lecture) = db.get_lecture(lecture_id)? else {
        bail!("unknown lecture: {}", lecture_id);
    };

    let timelines = db.lecture_timelines(lecture_id)?;
    let insights = aggregate(&lecture, &timelines, &config.struggle, &CancelToken::new())?;

    let report = LectureReport {
        lecture_id: lecture.id.clone(),
        title: lecture.title.clone(),
        students: timelines.len(),
        concepts: rank_by_struggle(insights),
    };

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Lecture: {} ({})", report.title, report.lecture_id);
    println!("Students with activity: {}", report.students);
    println!();
    println!(
        "{:<24} {:>8} {:>10} {:>12} {:>9}",
        "Concept", "Replays", "Drop-offs", "Avg watch", "Struggle"
    );
    for insight in &report.concepts {
        println!(
            "{:<24} {:>8} {:>10} {:>11.1}s {:>9.2}",
            insight.concept_name,
            insight.replay_count,
            insight.drop_off_count,
            insight.avg_watch_time,
            insight.struggle_score
        );
    }

    Ok(())
}

fn analyze_course(db: &Database, config: &Config, course_id: &str, format: Format) -> Result<()> {
    let lectures = db.course_lectures(course_id)?;
    if lectures.is_empty() {
        bail!("no lectures found for course: {}", course_id);
    }

    let lectures_by_id: HashMap<String, Lecture> =
        lectures.iter().map(|l| (l.id.clone(), l.clone())).collect();
    let concept_names: HashMap<&str, &str> = lectures
        .iter()
        .flat_map(|l| l.concepts.iter())
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect();

    let mut insights_by_lecture = HashMap::new();
    for lecture in &lectures {
        let timelines = db.lecture_timelines(&lecture.id)?;
        let insights = aggregate(lecture, &timelines, &config.struggle, &CancelToken::new())?;
        insights_by_lecture.insert(lecture.id.clone(), insights);
    }

    let students = db.course_students(course_id)?;
    let mut assignments = Vec::with_capacity(students.len());
    for student_id in &students {
        let timelines = db.student_timelines(student_id)?;
        let features = StudentFeatures::extract(&timelines, &lectures_by_id);
        assignments.push(ClusterAssignment {
            student_id: student_id.clone(),
            cluster: assign_cluster(&features, &config.clusters),
            engagement: features.engagement,
            lecture_ids: timelines.iter().map(|t| t.lecture_id.clone()).collect(),
        });
    }

    let clusters = rollup(
        &assignments,
        &insights_by_lecture,
        config.struggle.struggle_threshold,
        &CancelToken::new(),
    )?;

    let report = CourseReport {
        course_id: course_id.to_string(),
        students: students.len(),
        clusters,
    };

    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Course: {}", report.course_id);
    println!("Students with activity: {}", report.students);
    for cluster in &report.clusters {
        println!();
        println!(
            "{} - {} student(s), avg engagement {:.0}%",
            cluster.cluster.display_name(),
            cluster.student_count,
            cluster.avg_engagement * 100.0
        );
        if cluster.struggling_concepts.is_empty() {
            println!("  No struggling concepts");
        } else {
            println!("  Struggling concepts:");
            for concept_id in &cluster.struggling_concepts {
                let name = concept_names
                    .get(concept_id.as_str())
                    .copied()
                    .unwrap_or(concept_id.as_str());
                println!("    - {}", name);
            }
        }
    }

    Ok(())
}
