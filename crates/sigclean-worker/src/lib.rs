//! Web worker entry point for sigclean processing.
//!
//! This crate compiles to a standalone WASM module that runs inside a
//! `Worker`. It receives upload bytes and `ProcessingOptions` via
//! `postMessage`, runs `sigclean_pipeline::process_staged`, posts a
//! progress message after every stage, and finally posts the processed
//! RGBA buffer back as a raw `Uint8Array`.
//!
//! Running the pipeline in a worker keeps the browser's main thread
//! free to animate the progress indicator.

use sigclean_pipeline::{PipelineError, ProcessingOptions, Progress, RgbaImage};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// Message protocol: the main thread sends a JS object with:
/// - `imageBytes`: `Uint8Array` containing the raw upload bytes
/// - `optionsJson`: `String` containing JSON-serialized `ProcessingOptions`
/// - `generation`: `f64` generation counter (passed through to every reply)
///
/// While processing, the worker posts one message per stage:
/// - `kind`: `"progress"`
/// - `generation`: `f64`
/// - `stage`: `String` stage name
/// - `percent`: `f64` overall percent
///
/// On success the final message is:
/// - `kind`: `"done"`, `ok`: `true`, `generation`
/// - `width`, `height`: `f64` dimensions of the processed image
/// - `pixels`: `Uint8Array` raw RGBA pixel data
///
/// On error the final message is:
/// - `kind`: `"done"`, `ok`: `false`, `generation`
/// - `errorJson`: `String` JSON-serialized `PipelineError`
///
/// # Worker entry point
///
/// Called automatically when the WASM module is instantiated in the
/// worker context.
#[wasm_bindgen(start)]
pub fn worker_main() {
    console_error_panic_hook::set_once();

    let global: web_sys::DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .expect_throw("not running in a DedicatedWorkerGlobalScope");

    let onmessage =
        Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
            handle_message(&event);
        });
    global.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget(); // lives for the worker lifetime
}

/// Handle one processing request from the main thread.
fn handle_message(event: &web_sys::MessageEvent) {
    let data = event.data();

    let generation = get(&data, "generation")
        .and_then(|v| v.as_f64())
        .unwrap_or(-1.0);

    let Some(image_bytes) = get(&data, "imageBytes")
        .and_then(|v| v.dyn_into::<js_sys::Uint8Array>().ok())
        .map(|array| array.to_vec())
    else {
        post_error(
            generation,
            &PipelineError::InvalidConfig("imageBytes is not a Uint8Array".into()),
        );
        return;
    };

    let options = match get(&data, "optionsJson")
        .and_then(|v| v.as_string())
        .map(|json| serde_json::from_str::<ProcessingOptions>(&json))
    {
        Some(Ok(options)) => options,
        Some(Err(e)) => {
            post_error(
                generation,
                &PipelineError::InvalidConfig(format!("failed to parse options: {e}")),
            );
            return;
        }
        None => {
            post_error(
                generation,
                &PipelineError::InvalidConfig("missing optionsJson field".into()),
            );
            return;
        }
    };

    // Synchronous: blocks this worker thread only. Progress messages are
    // queued and delivered in order before the final one.
    let outcome = sigclean_pipeline::process(&image_bytes, &options, |progress| {
        post_progress(generation, progress);
    });

    match outcome {
        Ok(image) => post_done(generation, &image),
        Err(e) => post_error(generation, &e),
    }
}

fn get(target: &JsValue, key: &str) -> Option<JsValue> {
    js_sys::Reflect::get(target, &JsValue::from_str(key))
        .ok()
        .filter(|v| !v.is_undefined())
}

/// A reply object carrying `kind` and `generation`.
fn reply(kind: &str, generation: f64) -> js_sys::Object {
    let response = js_sys::Object::new();
    set(&response, "kind", &JsValue::from_str(kind));
    set(&response, "generation", &JsValue::from_f64(generation));
    response
}

fn set(target: &js_sys::Object, key: &str, value: &JsValue) {
    let _ = js_sys::Reflect::set(target, &JsValue::from_str(key), value);
}

fn post_progress(generation: f64, progress: Progress) {
    let response = reply("progress", generation);
    set(&response, "stage", &JsValue::from_str(progress.stage));
    set(
        &response,
        "percent",
        &JsValue::from_f64(f64::from(progress.percent)),
    );
    post(&response);
}

/// Post the processed image back as raw RGBA bytes.
fn post_done(generation: f64, image: &RgbaImage) {
    let response = reply("done", generation);
    set(&response, "ok", &JsValue::from_bool(true));
    set(&response, "width", &JsValue::from_f64(f64::from(image.width())));
    set(
        &response,
        "height",
        &JsValue::from_f64(f64::from(image.height())),
    );
    set(
        &response,
        "pixels",
        &js_sys::Uint8Array::from(image.as_raw().as_slice()),
    );
    post(&response);
}

fn post_error(generation: f64, error: &PipelineError) {
    web_sys::console::error_1(&JsValue::from_str(&format!(
        "signature processing failed: {error}"
    )));
    let error_json = serde_json::to_string(error).unwrap_or_else(|ser_err| {
        format!("{{\"InvalidConfig\":\"serialization error: {ser_err}\"}}")
    });

    let response = reply("done", generation);
    set(&response, "ok", &JsValue::from_bool(false));
    set(&response, "errorJson", &JsValue::from_str(&error_json));
    post(&response);
}

fn post(response: &js_sys::Object) {
    if let Ok(global) = js_sys::global().dyn_into::<web_sys::DedicatedWorkerGlobalScope>() {
        let _ = global.post_message(response);
    }
}
