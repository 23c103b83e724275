use anyhow::Result;

use crate::engine::Engine;

pub fn list_courses(engine: &Engine) -> Result<()> {
    let registry = engine.assembler.registry();
    let courses = registry.courses();

    if courses.is_empty() {
        println!("No courses.");
        return Ok(());
    }

    println!("{:<12} {:<12} {:<8} {:>9}  NAME", "ID", "CODE", "ACTIVE", "MATERIALS");
    for course in courses {
        let materials = registry.corpus(&course.id).map(|c| c.len()).unwrap_or(0);
        println!(
            "{:<12} {:<12} {:<8} {:>9}  {}",
            course.id, course.code, course.active, materials, course.name
        );
    }

    Ok(())
}
