use rusqlite::Connection;

use crate::db::{insert_template_if_absent, DatabaseError};
use crate::models::{ModelParameters, PromptTemplate};

/// Version that starts in the active slot on a fresh store.
pub const INITIAL_ACTIVE: &str = "v1.0";

struct SeedTemplate {
    version: &'static str,
    description: &'static str,
    template: &'static str,
    temperature: f32,
    max_tokens: u32,
}

const SEED_TEMPLATES: &[SeedTemplate] = &[
    SeedTemplate {
        version: "v1.0",
        description: "Original baseline prompt",
        template: "Analyze the following patient data and provide a concise clinical summary:

Patient Information:
- Name: {name}
- Condition: {condition}
- Department: {department}
- Lab Results: {lab_results}

Provide a professional medical summary focusing on:
1. Current condition assessment
2. Key findings from lab results
3. Recommended next steps

Keep the summary concise and clinical.",
        temperature: 0.7,
        max_tokens: 500,
    },
    SeedTemplate {
        version: "v2.0",
        description: "Enhanced with structured analysis requirements",
        template: "You are an experienced medical AI assistant. Analyze this patient data with clinical precision:

PATIENT DATA:
Name: {name}
Primary Condition: {condition}
Department: {department}
Laboratory Results: {lab_results}

ANALYSIS REQUIREMENTS:
1. Assess severity and urgency
2. Identify critical lab value deviations
3. Suggest evidence-based interventions
4. Note any red flags requiring immediate attention

Format: Professional medical summary (3-4 sentences).",
        temperature: 0.6,
        max_tokens: 600,
    },
    SeedTemplate {
        version: "v3.0",
        description: "SOAP format for structured output",
        template: "Clinical Summary Request:

Patient: {name}
Chief Complaint: {condition}
Treating Department: {department}
Lab Data: {lab_results}

Generate a SOAP-style summary:
- Subjective: Patient presentation
- Objective: Lab findings and vitals
- Assessment: Clinical interpretation
- Plan: Recommended actions

Be specific, actionable, and evidence-based.",
        temperature: 0.5,
        max_tokens: 700,
    },
    SeedTemplate {
        version: "v4.0",
        description: "XML-structured prompt with a worked example",
        template: "You are an expert medical AI assistant. Your task is to analyze patient data and generate a professional clinical summary.

<patient_data>
    <name>{name}</name>
    <condition>{condition}</condition>
    <department>{department}</department>
    <lab_results>
{lab_results}
    </lab_results>
</patient_data>

<requirements>
    1. Analyze the patient's current status based on the condition and lab results.
    2. Identify any critical values or concerning trends.
    3. Recommend specific, evidence-based next steps or interventions.
    4. Maintain a professional, objective clinical tone.
</requirements>

<example>
    <input>
        <name>Jane Doe</name>
        <condition>Type 2 Diabetes</condition>
        <department>Endocrinology</department>
        <lab_results>
          - HbA1c: 8.5% (Normal: <5.7%)
          - Fasting Glucose: 145 mg/dL (Normal: <100 mg/dL)
        </lab_results>
    </input>
    <output>
        **Clinical Assessment**: Patient presents with uncontrolled Type 2 Diabetes, evidenced by elevated HbA1c (8.5%) and fasting glucose (145 mg/dL), indicating suboptimal glycemic control.

        **Key Findings**:
        - Hyperglycemia and elevated long-term glucose markers.

        **Plan**:
        1. Review and potentially intensify oral hypoglycemic agents or consider insulin initiation.
        2. Reinforce lifestyle modifications (diet/exercise).
        3. Schedule follow-up in 3 months to monitor HbA1c.
    </output>
</example>

Based on the patient data provided above, generate the clinical summary within <clinical_summary> tags.
",
        temperature: 0.4,
        max_tokens: 800,
    },
];

/// Insert any missing seed template. Existing rows, their statistics and the
/// active flag are left alone. Returns how many rows were inserted.
///
/// Creation times are staggered in catalog order so that "most recently
/// created" is well defined before any rating exists.
pub fn seed_catalog(conn: &Connection) -> Result<usize, DatabaseError> {
    let base = chrono::Local::now().naive_local();
    let any_active = crate::db::get_active_template(conn)?.is_some();
    let mut inserted = 0;

    for (i, seed) in SEED_TEMPLATES.iter().enumerate() {
        let template = PromptTemplate {
            version: seed.version.into(),
            description: seed.description.into(),
            template: seed.template.into(),
            parameters: ModelParameters {
                temperature: seed.temperature,
                max_tokens: seed.max_tokens,
            },
            avg_rating: 0.0,
            avg_cost: 0.0,
            usage_count: 0,
            active: !any_active && seed.version == INITIAL_ACTIVE,
            ab_eligible: true,
            last_used: None,
            created_at: base + chrono::Duration::milliseconds(i as i64),
            revision: 0,
        };
        if insert_template_if_absent(conn, &template)? {
            inserted += 1;
        }
    }

    if inserted > 0 {
        tracing::info!(inserted, "Seeded prompt catalog");
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_active_template, list_templates, open_memory_database, set_active_template};
    use crate::pipeline::generation::template::validate;

    #[test]
    fn seeds_four_templates_with_v1_active() {
        let conn = open_memory_database().unwrap();
        assert_eq!(seed_catalog(&conn).unwrap(), 4);

        let templates = list_templates(&conn).unwrap();
        let versions: Vec<&str> = templates.iter().map(|t| t.version.as_str()).collect();
        assert_eq!(versions, vec!["v1.0", "v2.0", "v3.0", "v4.0"]);
        assert_eq!(get_active_template(&conn).unwrap().unwrap().version, "v1.0");
        assert_eq!(templates[3].parameters.max_tokens, 800);
        assert!((templates[2].parameters.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn seeding_is_idempotent_and_keeps_promotion() {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        set_active_template(&conn, "v3.0").unwrap();

        assert_eq!(seed_catalog(&conn).unwrap(), 0);
        assert_eq!(list_templates(&conn).unwrap().len(), 4);
        assert_eq!(get_active_template(&conn).unwrap().unwrap().version, "v3.0");
    }

    #[test]
    fn seed_templates_use_only_known_placeholders() {
        for seed in SEED_TEMPLATES {
            assert!(validate(seed.template).is_ok(), "{} has a bad placeholder", seed.version);
        }
    }
}
