// tests/answer_tests.rs

mod common;

use std::time::Duration;

use common::{multi_select_question, single_answer_question, spawn_app, spawn_app_with};
use quizbank::{
    repository::QuestionRepository,
    services::{
        backfill::UNAVAILABLE_EXPLANATION,
        mock::{MockEnricher, MockReply},
    },
};
use serde_json::json;

#[tokio::test]
async fn correct_single_answer() {
    let app = spawn_app().await;
    let question = app.seed_question(single_answer_question()).await;

    let body: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedOptionIndex": 1 }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["correct"], true);
    assert_eq!(body["correctIndex"], 1);
    assert_eq!(body["correctIndices"], json!([1]));
    assert_eq!(body["stats"]["total"], 1);
    assert_eq!(body["stats"]["counts"]["1"], 1);
    assert_eq!(body["stats"]["counts"]["0"], 0);
}

#[tokio::test]
async fn wrong_single_answer() {
    let app = spawn_app().await;
    let question = app.seed_question(single_answer_question()).await;

    let body: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedOptionIndex": 3 }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["correct"], false);
    assert_eq!(body["correctIndex"], 1);
}

#[tokio::test]
async fn multi_select_needs_the_exact_set() {
    let app = spawn_app().await;
    let question = app.seed_question(multi_select_question()).await;

    let exact: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedIndices": [2, 0] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(exact["correct"], true);

    let subset: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedIndices": [0] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(subset["correct"], false);

    let superset: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedIndices": [0, 1, 2] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(superset["correct"], false);

    // Three anonymous attempts, option 0 picked by all of them.
    assert_eq!(superset["stats"]["total"], 3);
    assert_eq!(superset["stats"]["counts"]["0"], 3);
    assert_eq!(superset["stats"]["counts"]["1"], 1);
    assert_eq!(superset["stats"]["counts"]["2"], 2);
}

#[tokio::test]
async fn unknown_question_is_not_found() {
    let app = spawn_app().await;

    let response = app
        .check_answer(json!({ "questionId": 9999, "selectedOptionIndex": 0 }))
        .await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn missing_selection_is_bad_request() {
    let app = spawn_app().await;
    let question = app.seed_question(single_answer_question()).await;

    let empty = app
        .check_answer(json!({ "questionId": question.id, "selectedIndices": [] }))
        .await;
    assert_eq!(empty.status().as_u16(), 400);

    let none = app.check_answer(json!({ "questionId": question.id })).await;
    assert_eq!(none.status().as_u16(), 400);
    assert!(app.repo.attempts_for_question(question.id).is_empty());
}

#[tokio::test]
async fn first_answer_backfills_explanation_once() {
    let app = spawn_app_with(MockEnricher::with_reply(MockReply::answer(
        1,
        "2 is the sum.",
    )))
    .await;
    let question = app.seed_question(single_answer_question()).await;

    for _ in 0..3 {
        let body: serde_json::Value = app
            .check_answer(json!({ "questionId": question.id, "selectedOptionIndex": 0 }))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(body["explanation"], "2 is the sum.");
    }

    assert_eq!(app.enricher.call_count(), 1);
    let stored = app.repo.find_question(question.id).await.unwrap().unwrap();
    assert_eq!(stored.explanation.as_deref(), Some("2 is the sum."));
}

#[tokio::test]
async fn concurrent_first_answers_call_the_service_once() {
    let app = spawn_app_with(
        MockEnricher::with_reply(MockReply::answer(1, "Only once."))
            .with_delay(Duration::from_millis(50)),
    )
    .await;
    let question = app.seed_question(single_answer_question()).await;

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let client = app.client.clone();
            let url = app.url("/api/check-answer");
            let body = json!({ "questionId": question.id, "selectedOptionIndex": i % 4 });
            tokio::spawn(async move {
                client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .unwrap()
                    .json::<serde_json::Value>()
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        let body = handle.await.unwrap();
        assert_eq!(body["explanation"], "Only once.");
    }
    assert_eq!(app.enricher.call_count(), 1);
}

#[tokio::test]
async fn unavailable_service_shows_placeholder_without_storing_it() {
    let app = spawn_app_with(MockEnricher::scripted(
        vec![MockReply::Unavailable],
        MockReply::answer(1, "Back online."),
    ))
    .await;
    let question = app.seed_question(single_answer_question()).await;

    let first: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedOptionIndex": 1 }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["explanation"], UNAVAILABLE_EXPLANATION);
    assert_eq!(first["correct"], true);

    let second: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedOptionIndex": 1 }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["explanation"], "Back online.");
    assert_eq!(app.enricher.call_count(), 2);
}

#[tokio::test]
async fn learner_attempt_is_overwritten_and_shows_in_progress() {
    let app = spawn_app().await;
    let username = app.register_learner().await;
    let question = app.seed_question(multi_select_question()).await;

    app.check_answer(json!({
        "questionId": question.id,
        "username": username,
        "selectedOptionIndex": 1
    }))
    .await;
    let body: serde_json::Value = app
        .check_answer(json!({
            "questionId": question.id,
            "username": format!("  {}  ", username),
            "selectedIndices": [0, 2]
        }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["correct"], true);
    assert_eq!(body["stats"]["total"], 1);
    assert_eq!(body["stats"]["counts"]["1"], 0);
    assert_eq!(app.repo.attempts_for_question(question.id).len(), 1);

    let progress: serde_json::Value = app
        .client
        .get(app.url(&format!("/api/user/{}/progress", username)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let entry = &progress[question.id.to_string()];
    assert_eq!(entry["selectedIndices"], json!([0, 2]));
    assert_eq!(entry["feedback"]["correct"], true);
    assert_eq!(entry["feedback"]["correctIndices"], json!([0, 2]));
    assert_eq!(
        entry["feedback"]["explanation"],
        "int and boolean are primitives."
    );
}

#[tokio::test]
async fn anonymous_attempts_accumulate() {
    let app = spawn_app().await;
    let question = app.seed_question(single_answer_question()).await;

    for username in [json!(null), json!(""), json!("nobody-registered")] {
        let response = app
            .check_answer(json!({
                "questionId": question.id,
                "username": username,
                "selectedOptionIndex": 2
            }))
            .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    let attempts = app.repo.attempts_for_question(question.id);
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.user_id.is_none()));
}

#[tokio::test]
async fn unknown_user_has_empty_progress() {
    let app = spawn_app().await;

    let progress: serde_json::Value = app
        .client
        .get(app.url("/api/user/ghost/progress"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(progress, json!({}));
}

#[tokio::test]
async fn stats_cover_every_option_of_wide_questions() {
    let app = spawn_app().await;
    let mut wide = single_answer_question();
    wide.options.push("panic".into());
    wide.answer_explanations.push(String::new());
    let question = app.seed_question(wide).await;

    let body: serde_json::Value = app
        .check_answer(json!({ "questionId": question.id, "selectedOptionIndex": 4 }))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(body["stats"]["counts"].as_object().unwrap().len(), 5);
    assert_eq!(body["stats"]["counts"]["4"], 1);
}
