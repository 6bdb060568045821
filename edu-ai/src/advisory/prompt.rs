//! Prompt construction per schema
//!
//! The user message carries the profile and free-form context; the system
//! message fixes the advisor role and the structured block the answer must
//! end with. Recommendation prompts also list the catalog so the model can
//! only pick known identifiers.

use crate::advisory::schema::ExtractionSchema;
use crate::advisory::transport::CompletionRequest;
use crate::catalog::{Catalog, UserProfile};
use std::fmt::Write;

const ADVISOR_ROLE: &str = "You are an experienced university admissions advisor. \
Answer in plain prose for the student, then follow the output format exactly.";

pub fn build_request(
    schema: &ExtractionSchema,
    profile: &UserProfile,
    context: &str,
    catalog: &Catalog,
) -> CompletionRequest {
    let system = format!("{}\n\n{}", ADVISOR_ROLE, schema.format_instructions());

    let mut user = String::new();
    let _ = writeln!(user, "Task: {}", task_line(schema));
    let _ = writeln!(
        user,
        "Academic strength: {:.0}/100 (tier {})",
        profile.strength_score,
        profile.strength_tier()
    );
    if let Some(budget) = profile.budget {
        let _ = writeln!(user, "Annual budget: {:.0} to {:.0}", budget.min, budget.max);
    }
    if !profile.preferred_categories.is_empty() {
        let _ = writeln!(
            user,
            "Preferred fields: {}",
            profile.preferred_categories.join(", ")
        );
    }
    let context = context.trim();
    if !context.is_empty() {
        let _ = writeln!(user, "\nStudent notes:\n{}", context);
    }

    if matches!(schema, ExtractionSchema::RecommendationSet { .. }) && !catalog.is_empty() {
        let _ = writeln!(user, "\nCatalog (id | name | selectivity tier | annual cost | tags):");
        for record in catalog.records() {
            let _ = writeln!(
                user,
                "{} | {} | {} | {:.0} | {}",
                record.id,
                record.name,
                record.selectivity_tier,
                record.annual_cost,
                record.tags.join(", ")
            );
        }
    }

    CompletionRequest { system, user }
}

fn task_line(schema: &ExtractionSchema) -> String {
    match schema {
        ExtractionSchema::ProfileAnalysis => {
            "Assess this applicant's overall strength and admissions outlook.".to_string()
        }
        ExtractionSchema::RecommendationSet { required } => {
            format!("Recommend the {} best-fitting universities from the catalog.", required)
        }
        ExtractionSchema::CostBreakdown => {
            "Estimate the annual cost of attendance by category.".to_string()
        }
        ExtractionSchema::FlashcardSet { max_cards } => format!(
            "Write up to {} study flashcards on the admissions topics in the notes.",
            max_cards
        ),
    }
}
