use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;

use grokify::assets::NullFetcher;
use grokify::config::EngineConfig;
use grokify::error::EngineError;
use grokify::processor::{TextCollectProcessor, TextStreamProcessor};
use grokify::stream::json_line_stream;

/// One upstream HTTP body carrying newline-delimited JSON events, split
/// into arbitrary byte chunks.
fn upstream_body(events: Vec<Value>) -> impl Stream<Item = Result<Bytes, EngineError>> + Send {
    let mut body = String::new();
    for event in events {
        body.push_str(&event.to_string());
        body.push('\n');
    }
    // Split mid-line to exercise reassembly.
    let bytes = body.into_bytes();
    let mid = bytes.len() / 2;
    let chunks: Vec<Result<Bytes, Infallible>> = vec![
        Ok(Bytes::from(bytes[..mid].to_vec())),
        Ok(Bytes::from(bytes[mid..].to_vec())),
    ];
    json_line_stream(futures_util::stream::iter(chunks))
}

fn token_event(token: &str) -> Value {
    json!({"result": {"response": {"token": token, "isThinking": false}}})
}

fn thinking_event(token: &str) -> Value {
    json!({"result": {"response": {"token": token, "isThinking": true}}})
}

fn processor(think: bool) -> TextStreamProcessor<NullFetcher> {
    TextStreamProcessor::new(
        &EngineConfig::default(),
        "grok-4",
        "token",
        NullFetcher,
        Some(think),
    )
}

async fn run(
    processor: TextStreamProcessor<NullFetcher>,
    events: Vec<Value>,
) -> Vec<String> {
    processor
        .process(upstream_body(events))
        .map(|item| item.expect("frame"))
        .collect()
        .await
}

fn chunk_payloads(frames: &[String]) -> Vec<Value> {
    frames
        .iter()
        .filter(|frame| frame.trim() != "data: [DONE]")
        .map(|frame| {
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).expect("chunk json")
        })
        .collect()
}

fn contents(frames: &[String]) -> Vec<String> {
    chunk_payloads(frames)
        .iter()
        .filter_map(|json| {
            json["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .filter(|content| !content.is_empty())
        .collect()
}

#[tokio::test]
async fn replayed_block_is_emitted_exactly_once() {
    let text = "你好！我是Grok，有什麼可以幫你的？";
    let mut events: Vec<Value> = text.chars().map(|c| token_event(&c.to_string())).collect();
    events.push(token_event(text));

    let frames = run(processor(false), events).await;
    assert_eq!(contents(&frames).concat(), text);

    let payloads = chunk_payloads(&frames);
    let roles = payloads
        .iter()
        .filter(|json| json["choices"][0]["delta"]["role"] == "assistant")
        .count();
    let finishes = payloads
        .iter()
        .filter(|json| json["choices"][0]["finish_reason"] == "stop")
        .count();
    let dones = frames.iter().filter(|f| f.trim() == "data: [DONE]").count();
    assert_eq!(roles, 1);
    assert_eq!(finishes, 1);
    assert_eq!(dones, 1);
    assert!(frames.last().expect("frames").trim() == "data: [DONE]");

    let first_id = payloads[0]["id"].as_str().expect("id").to_string();
    assert!(first_id.starts_with("chatcmpl-"));
    assert!(payloads.iter().all(|json| json["id"] == first_id.as_str()));
}

#[tokio::test]
async fn long_repeat_that_is_not_a_suffix_still_streams() {
    let a = "第一段足够长的内容第一段足够长的内容";
    let b = "中间插入的另一段内容";
    let events = vec![token_event(a), token_event(b), token_event(a)];

    let frames = run(processor(false), events).await;
    assert_eq!(contents(&frames), vec![a, b, a]);
}

#[tokio::test]
async fn short_tokens_repeat_without_suppression() {
    let events = vec![token_event("ha"), token_event("ha")];
    let frames = run(processor(false), events).await;
    assert_eq!(contents(&frames), vec!["ha", "ha"]);
}

#[tokio::test]
async fn reasoning_routes_into_think_block() {
    let events = vec![
        json!({"result": {"response": {"token": "Thinking about user request", "isThinking": true, "messageTag": "header"}}}),
        json!({"result": {"response": {"token": "Step summary", "isThinking": true, "messageTag": "summary"}}}),
        json!({"result": {"response": {"token": "你", "isThinking": false, "messageTag": "final"}}}),
        json!({"result": {"response": {"token": "好", "isThinking": false, "messageTag": "final"}}}),
    ];

    let frames = run(processor(true), events).await;
    assert_eq!(
        contents(&frames),
        vec![
            "<think>\n",
            "Thinking about user request",
            "Step summary",
            "</think>\n",
            "你",
            "好",
        ]
    );
}

#[tokio::test]
async fn reasoning_is_suppressed_when_disabled() {
    let events = vec![
        thinking_event("hidden reasoning"),
        json!({"result": {"response": {"token": "heading", "messageTag": "header"}}}),
        token_event("A"),
    ];
    let frames = run(processor(false), events).await;
    assert_eq!(contents(&frames), vec!["A"]);
}

#[tokio::test]
async fn late_response_id_does_not_change_the_stream_id() {
    let events = vec![
        json!({"result": {"response": {"responseId": "early", "token": "你"}}}),
        json!({"result": {"response": {"responseId": "late-override", "token": "好"}}}),
    ];
    let frames = run(processor(false), events).await;
    let payloads = chunk_payloads(&frames);
    assert!(payloads.iter().all(|json| json["id"] == "chatcmpl-early"));
}

#[tokio::test]
async fn aggregate_message_fills_in_when_nothing_streamed() {
    let events = vec![
        thinking_event("思考中"),
        json!({"result": {"response": {"modelResponse": {"message": "最终回答", "generatedImageUrls": []}}}}),
    ];
    let frames = run(processor(true), events).await;
    assert_eq!(
        contents(&frames),
        vec!["<think>\n", "思考中", "</think>\n", "最终回答"]
    );
}

#[tokio::test]
async fn aggregate_message_is_not_emitted_twice() {
    let events = vec![
        token_event("你"),
        token_event("好"),
        json!({"result": {"response": {"modelResponse": {"message": "你好"}}}}),
    ];
    let frames = run(processor(false), events).await;
    assert_eq!(contents(&frames), vec!["你", "好"]);
}

#[tokio::test]
async fn invalid_generated_urls_are_filtered() {
    let events = vec![json!({"result": {"response": {"modelResponse": {
        "generatedImageUrls": ["", "/", "https://assets.grok.com/", "/users/u/generated/pic/image.jpg"]
    }}}})];
    let frames = run(processor(false), events).await;
    assert_eq!(
        contents(&frames),
        vec!["![pic](https://assets.grok.com/users/u/generated/pic/image.jpg)\n"]
    );
}

#[tokio::test]
async fn image_output_beats_narration_in_stream_mode() {
    let events = vec![
        json!({"result": {"response": {"streamingImageGenerationResponse": {"imageIndex": 0, "progress": 66}}}}),
        token_event("Here is the image I generated for you"),
        json!({"result": {"response": {"modelResponse": {
            "message": "Here is the image I generated for you",
            "generatedImageUrls": ["/users/u/generated/pic/image.jpg"]
        }}}}),
    ];
    let frames = run(processor(false), events).await;
    assert_eq!(
        contents(&frames),
        vec!["![pic](https://assets.grok.com/users/u/generated/pic/image.jpg)\n"]
    );
}

#[tokio::test]
async fn image_output_beats_narration_in_collect_mode() {
    let events = vec![json!({"result": {"response": {"modelResponse": {
        "message": "Here is the image I generated for you",
        "generatedImageUrls": ["/users/u/generated/pic/image.jpg"]
    }}}})];
    let collector = TextCollectProcessor::new(
        &EngineConfig::default(),
        "grok-4",
        "token",
        NullFetcher,
    );
    let completion = collector.collect(upstream_body(events)).await;
    assert_eq!(
        completion.choices[0].message.content,
        "![pic](https://assets.grok.com/users/u/generated/pic/image.jpg)\n"
    );
}

#[tokio::test]
async fn configured_proxy_rewrites_image_links() {
    let config = EngineConfig {
        public_base_url: "https://grok.testdomain.xyz".to_string(),
        ..EngineConfig::default()
    };
    let events = vec![json!({"result": {"response": {"modelResponse": {
        "generatedImageUrls": ["", "/users/test/generated/real-image-id/image.jpg"]
    }}}})];

    let processor =
        TextStreamProcessor::new(&config, "grok-4", "token", NullFetcher, Some(false));
    let frames = processor
        .process(upstream_body(events))
        .map(|item| item.expect("frame"))
        .collect::<Vec<_>>()
        .await;

    let streamed = contents(&frames);
    assert!(streamed
        .iter()
        .any(|c| c.contains("https://grok.testdomain.xyz/v1/files/image/users/test/generated/real-image-id/image.jpg")));
    // The empty URL entry must not produce an empty link.
    assert!(streamed.iter().all(|c| !c.contains("v1/files/image/)")));
}

#[tokio::test]
async fn tag_spans_are_stripped_across_token_boundaries() {
    let events = vec![
        token_event("visible <grok:"),
        token_event("render type=\"card\">"),
        token_event("machine payload"),
        token_event("</grok:render> tail"),
    ];
    let frames = run(processor(false), events).await;
    assert_eq!(contents(&frames).concat(), "visible  tail");
}

#[tokio::test]
async fn collect_aggregates_message_and_metadata() {
    let events = vec![
        json!({"result": {"response": {"llmInfo": {"modelHash": "hash-early"}}}}),
        json!({"result": {"response": {"modelResponse": {
            "responseId": "rid-5",
            "message": "正文<xaiartifact id=\"a\"/>结束",
            "metadata": {"llm_info": {"modelHash": "hash-final"}}
        }}}}),
    ];
    let collector = TextCollectProcessor::new(
        &EngineConfig::default(),
        "grok-4",
        "token",
        NullFetcher,
    );
    let completion = collector.collect(upstream_body(events)).await;

    assert_eq!(completion.id, "chatcmpl-rid-5");
    assert_eq!(completion.system_fingerprint, "hash-final");
    assert_eq!(completion.choices[0].message.content, "正文结束");
    assert_eq!(completion.usage.total_tokens, 0);
}
