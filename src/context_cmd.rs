//! `cctx context`, `cctx multi`, and `cctx detect`.
//!
//! Human-readable output goes to stdout; `--json` prints the full result
//! structure instead, in the same shape the HTTP server returns.

use anyhow::{bail, Result};

use course_context_core::models::{CourseContext, RankedMaterial};

use crate::engine::{Engine, OptionOverrides};

pub async fn run_context(
    engine: &Engine,
    course_id: &str,
    question: &str,
    overrides: &OptionOverrides,
    json: bool,
) -> Result<()> {
    let Some(course) = engine.assembler.registry().course(course_id) else {
        bail!("Unknown course: {}", course_id);
    };

    let options = engine.options(overrides);
    let ctx = engine
        .assembler
        .build_context(course_id, question, &options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ctx)?);
        return Ok(());
    }

    println!("Course: {} ({})", course.code, course.name);
    print_context(&ctx);
    Ok(())
}

pub async fn run_multi(
    engine: &Engine,
    user_id: &str,
    question: &str,
    course_ids: &[String],
    overrides: &OptionOverrides,
    json: bool,
) -> Result<()> {
    let options = engine.options(overrides);
    let explicit = (!course_ids.is_empty()).then_some(course_ids);
    let multi = engine
        .multi
        .build_multi_course_context(user_id, question, explicit, &options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&multi)?);
        return Ok(());
    }

    if multi.course_ids.is_empty() {
        println!("No courses.");
        return Ok(());
    }

    if !multi.detected.is_empty() {
        println!("Detected:");
        for d in &multi.detected {
            println!("  {:<12} {:.1}", d.code, d.score);
        }
        println!();
    }

    for ctx in &multi.contexts {
        println!("Course: {}", ctx.course_id);
        print_materials(&ctx.materials);
    }
    println!("Total tokens: {}", multi.total_tokens);
    println!();
    println!("--- context ---");
    println!("{}", multi.combined_text);
    Ok(())
}

pub fn run_detect(engine: &Engine, question: &str, json: bool) -> Result<()> {
    let courses = engine.assembler.registry().courses();
    let detections = engine.multi.detect_courses(question, &courses);

    if json {
        println!("{}", serde_json::to_string_pretty(&detections)?);
        return Ok(());
    }

    if detections.is_empty() {
        println!("No courses.");
        return Ok(());
    }

    println!("{:<12} {:<12} {:>6}", "ID", "CODE", "SCORE");
    for d in &detections {
        println!("{:<12} {:<12} {:>6.1}", d.course_id, d.code, d.score);
    }
    Ok(())
}

fn print_context(ctx: &CourseContext) {
    if let Some(routing) = &ctx.routing {
        println!(
            "Routing: {} (confidence {}, {:.2})",
            routing.action, routing.confidence.level, routing.confidence.score
        );
    }
    println!("Tokens: {}", ctx.estimated_tokens);
    println!();

    if ctx.materials.is_empty() {
        println!("No relevant materials.");
        return;
    }

    print_materials(&ctx.materials);
    println!("--- context ---");
    println!("{}", ctx.context_text);
}

fn print_materials(materials: &[RankedMaterial]) {
    for (i, m) in materials.iter().enumerate() {
        println!("{}. [{:.0}%] {} / {}", i + 1, m.relevance_score, m.kind, m.title);
        if let Some(week) = m.week {
            println!("    week: {}", week);
        }
        if !m.matched_keywords.is_empty() {
            println!("    keywords: {}", m.matched_keywords.join(", "));
        }
        println!("    excerpt: \"{}\"", m.excerpt.replace('\n', " ").trim());
        println!("    id: {}", m.id);
        println!();
    }
}
