use super::*;
use chrono::NaiveDate;

fn turn(question: &str, answer: &str) -> ConversationTurn {
    ConversationTurn {
        id: 1,
        student_id: "student_1".to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        created_date: NaiveDate::from_ymd_opt(2024, 1, 1)
            .expect("valid date")
            .and_hms_opt(12, 0, 0)
            .expect("valid time"),
    }
}

#[test]
fn level_parsing_accepts_known_levels() {
    assert_eq!(StudentLevel::from_input("beginner"), StudentLevel::Beginner);
    assert_eq!(StudentLevel::from_input("BEGINNER"), StudentLevel::Beginner);
    assert_eq!(
        StudentLevel::from_input("intermediate"),
        StudentLevel::Intermediate
    );
    assert_eq!(StudentLevel::from_input("Advanced"), StudentLevel::Advanced);
}

#[test]
fn unknown_levels_fall_back_to_intermediate() {
    assert_eq!(StudentLevel::from_input("expert"), StudentLevel::Intermediate);
    assert_eq!(StudentLevel::from_input(""), StudentLevel::Intermediate);
    assert_eq!(StudentLevel::from_input("phd"), StudentLevel::Intermediate);
}

#[test]
fn default_level_is_intermediate() {
    assert_eq!(StudentLevel::default(), StudentLevel::Intermediate);
}

#[test]
fn system_prompt_carries_level_and_rules() {
    let prompt = system_prompt(StudentLevel::Beginner);

    assert!(prompt.contains("STRICT RULES:"));
    assert!(prompt.contains("Use ONLY the information provided in the context."));
    assert!(prompt.contains("BEGINNER"));
    assert!(prompt.contains("Use simple language."));
    assert!(prompt.contains("1. Concept Overview"));
    assert!(prompt.contains("5. Final Summary"));
}

#[test]
fn each_level_gets_its_own_adaptation_rules() {
    let beginner = system_prompt(StudentLevel::Beginner);
    let advanced = system_prompt(StudentLevel::Advanced);

    assert!(beginner.contains("real-world examples"));
    assert!(!beginner.contains("derivations"));
    assert!(advanced.contains("derivations"));
    assert!(advanced.contains("ADVANCED"));
}

#[test]
fn question_prompt_lays_out_context_then_question() {
    let prompt = question_prompt("Newton's second law states F = ma.", "What is force?");
    assert_eq!(
        prompt,
        "Context:\nNewton's second law states F = ma.\n\nQuestion:\nWhat is force?"
    );
}

#[test]
fn build_messages_orders_system_history_question() {
    let history = vec![
        turn("What is velocity?", "Velocity is the rate of change of position."),
        turn("And acceleration?", "Acceleration is the rate of change of velocity."),
    ];

    let messages = build_messages(
        "F = ma relates force to acceleration.",
        "How does force relate to mass?",
        StudentLevel::Intermediate,
        &history,
    );

    assert_eq!(messages.len(), 6);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[1].role, "user");
    assert_eq!(messages[1].content, "What is velocity?");
    assert_eq!(messages[2].role, "assistant");
    assert_eq!(messages[3].role, "user");
    assert_eq!(messages[4].role, "assistant");
    assert_eq!(messages[5].role, "user");
    assert!(messages[5].content.contains("F = ma relates force"));
    assert!(messages[5].content.ends_with("How does force relate to mass?"));
}

#[test]
fn build_messages_without_history_is_system_plus_question() {
    let messages = build_messages("some context", "a question", StudentLevel::Advanced, &[]);

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "system");
    assert_eq!(messages[1].role, "user");
}

#[test]
fn refusal_message_is_fixed() {
    assert_eq!(
        REFUSAL_MESSAGE,
        "I don’t have enough information in the provided material."
    );
}
