use lingo_core::{Explanation, GrammarPoint, Segment};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn explanation_needs_only_a_translation() {
    let explanation: Explanation =
        serde_json::from_value(json!({ "translation": "A cat" })).unwrap();

    assert_eq!(explanation, Explanation::with_translation("A cat"));
    assert!(explanation.vocabulary.is_empty());
    assert_eq!(explanation.cultural_context, None);
}

#[test]
fn explanation_without_translation_is_rejected() {
    let result = serde_json::from_value::<Explanation>(json!({
        "explanation": "Subject marked with が",
    }));
    assert!(result.is_err());
}

#[test]
fn full_explanation_keeps_every_section() {
    let explanation: Explanation = serde_json::from_value(json!({
        "translation": "There is a cat",
        "explanation": "いる marks existence of animate things",
        "reading_text": "ねこがいる",
        "vocabulary": [{ "word": "猫", "meaning": "cat", "reading": "ねこ" }],
        "grammar_points": [{ "point": "がいる", "explanation": "existence" }],
        "difficulty_level": "beginner",
    }))
    .unwrap();

    assert_eq!(explanation.reading_text.as_deref(), Some("ねこがいる"));
    assert_eq!(explanation.vocabulary[0].reading.as_deref(), Some("ねこ"));
    assert_eq!(explanation.vocabulary[0].usage, "");
    assert_eq!(
        explanation.grammar_points,
        vec![GrammarPoint {
            point: "がいる".into(),
            explanation: "existence".into(),
            example: None,
        }]
    );
    assert_eq!(explanation.difficulty_level.as_deref(), Some("beginner"));
}

#[test]
fn bare_segment_decodes_without_ai_fields() {
    let segment: Segment =
        serde_json::from_value(json!({ "id": "s1", "order": 3, "text": "猫がいる" })).unwrap();

    assert_eq!(segment, Segment::new("s1", 3, "猫がいる"));
    assert!(!segment.has_explanation());
}

#[test]
fn explained_segment_survives_a_save_and_reload() {
    let mut segment = Segment::new("s1", 0, "猫がいる");
    segment.explanation = Some(Explanation::with_translation("There is a cat"));
    segment.translation = Some("There is a cat".into());
    segment.start_time = Some(1.5);

    let saved = serde_json::to_string(&segment).unwrap();
    let reloaded: Segment = serde_json::from_str(&saved).unwrap();

    assert_eq!(reloaded, segment);
}
