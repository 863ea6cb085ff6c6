//! Web worker communication for off-main-thread processing.
//!
//! [`PipelineWorker`] wraps a `web_sys::Worker` running the
//! `sigclean-worker` WASM module. It sends upload bytes and options to
//! the worker via `postMessage`, forwards progress messages to a
//! callback, and resolves with the processed RGBA image.
//!
//! The worker is created from embedded JS + WASM blobs, so no extra
//! static files need to be served.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sigclean_pipeline::{PipelineError, ProcessingOptions, RgbaImage};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// Errors from a worker run.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The pipeline itself failed (validation or processing).
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The run was cancelled before the worker answered.
    #[error("processing was cancelled")]
    Cancelled,

    /// The worker replied with something that could not be understood.
    #[error("malformed worker response: {0}")]
    Protocol(String),

    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for WorkerError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

/// A worker together with the WASM blob URL its init fetches.
///
/// The URL must outlive the worker's startup, so it is revoked only when
/// the worker is replaced or dropped.
#[derive(Debug)]
struct WorkerSlot<W> {
    worker: W,
    wasm_url: String,
}

impl<W> WorkerSlot<W> {
    /// Put `next` in place and hand back the retired slot.
    const fn replace(&mut self, next: Self) -> Self {
        std::mem::replace(self, next)
    }
}

impl WorkerSlot<web_sys::Worker> {
    fn retire(self) {
        self.worker.terminate();
        web_sys::Url::revoke_object_url(&self.wasm_url).ok();
    }
}

/// Runs the pipeline in a dedicated web worker.
///
/// Create one at startup and reuse it for all uploads. Call
/// [`cancel`](Self::cancel) to abandon an in-progress run: the worker
/// is killed and a fresh one takes its place.
pub struct PipelineWorker {
    worker_js: &'static str,
    worker_wasm: &'static [u8],
    inner: RefCell<WorkerSlot<web_sys::Worker>>,
    /// Latest generation handed out; replies for older ones are dropped.
    generation: Cell<f64>,
    /// Reject function of the run currently awaiting a reply.
    pending_reject: Rc<RefCell<Option<js_sys::Function>>>,
}

impl PipelineWorker {
    /// Create a worker from embedded JS glue and WASM binary.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::JsError`] outside a browser environment.
    pub fn new(
        worker_js: &'static str,
        worker_wasm: &'static [u8],
    ) -> Result<Self, WorkerError> {
        let slot = create_worker(worker_js, worker_wasm)?;
        Ok(Self {
            worker_js,
            worker_wasm,
            inner: RefCell::new(slot),
            generation: Cell::new(0.0),
            pending_reject: Rc::new(RefCell::new(None)),
        })
    }

    /// Process `image_bytes` in the worker.
    ///
    /// `on_progress` receives each overall percent the worker reports
    /// for this run. Messages tagged with an older generation are
    /// ignored, so a superseded run never reports into a newer one.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::Pipeline`] if the pipeline rejected or failed on the input
    /// - [`WorkerError::Cancelled`] if [`cancel`](Self::cancel) was called first
    /// - [`WorkerError::Protocol`] / [`WorkerError::JsError`] for transport failures
    #[allow(clippy::future_not_send)] // WASM is single-threaded
    pub async fn run(
        &self,
        image_bytes: &[u8],
        options: &ProcessingOptions,
        mut on_progress: impl FnMut(u8) + 'static,
    ) -> Result<RgbaImage, WorkerError> {
        let options_json = serde_json::to_string(options)
            .map_err(|e| WorkerError::Protocol(format!("failed to serialize options: {e}")))?;

        let generation = self.generation.get() + 1.0;
        self.generation.set(generation);

        // { imageBytes: Uint8Array, optionsJson: string, generation: f64 }
        let message = js_sys::Object::new();
        js_sys::Reflect::set(
            &message,
            &JsValue::from_str("imageBytes"),
            &js_sys::Uint8Array::from(image_bytes),
        )?;
        js_sys::Reflect::set(
            &message,
            &JsValue::from_str("optionsJson"),
            &JsValue::from_str(&options_json),
        )?;
        js_sys::Reflect::set(
            &message,
            &JsValue::from_str("generation"),
            &JsValue::from_f64(generation),
        )?;

        let result = Rc::new(RefCell::new(None::<Result<RgbaImage, WorkerError>>));
        let result_clone = Rc::clone(&result);

        let (promise, resolve, reject) = new_promise()?;
        *self.pending_reject.borrow_mut() = Some(reject.clone());

        let onmessage = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
            move |event: web_sys::MessageEvent| {
                let data = event.data();

                let resp_generation = field(&data, "generation")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(-1.0);
                if (resp_generation - generation).abs() > f64::EPSILON {
                    return;
                }

                match field(&data, "kind").and_then(|v| v.as_string()).as_deref() {
                    Some("progress") => {
                        if let Some(percent) = field(&data, "percent").and_then(|v| v.as_f64()) {
                            on_progress(percent_to_u8(percent));
                        }
                    }
                    Some("done") => {
                        *result_clone.borrow_mut() = Some(parse_done(&data));
                        resolve.call0(&JsValue::NULL).ok();
                    }
                    other => {
                        *result_clone.borrow_mut() = Some(Err(WorkerError::Protocol(format!(
                            "unexpected message kind {other:?}"
                        ))));
                        resolve.call0(&JsValue::NULL).ok();
                    }
                }
            },
        );

        let onerror =
            Closure::<dyn FnMut(web_sys::ErrorEvent)>::new(move |event: web_sys::ErrorEvent| {
                let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(&event.message()));
            });

        {
            let slot = self.inner.borrow();
            let worker = &slot.worker;
            worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
            worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));
            worker.post_message(&message)?;
        }

        // Keep the closures alive until the reply arrives.
        let _onmessage_guard = onmessage;
        let _onerror_guard = onerror;

        let await_result = wasm_bindgen_futures::JsFuture::from(promise).await;

        if (self.generation.get() - generation).abs() <= f64::EPSILON {
            self.pending_reject.borrow_mut().take();
            let slot = self.inner.borrow();
            let worker = &slot.worker;
            worker.set_onmessage(None);
            worker.set_onerror(None);
        }

        match await_result {
            Ok(_) => result.borrow_mut().take().unwrap_or_else(|| {
                Err(WorkerError::Protocol(
                    "worker completed but no result captured".into(),
                ))
            }),
            Err(e) if e.as_string().as_deref() == Some(CANCELLED) => Err(WorkerError::Cancelled),
            Err(e) => Err(WorkerError::JsError(
                e.as_string().unwrap_or_else(|| "unknown worker error".into()),
            )),
        }
    }

    /// Abandon any in-progress run by terminating the worker and
    /// creating a fresh one.
    ///
    /// The pending [`run`](Self::run) resolves with
    /// [`WorkerError::Cancelled`]; no partial result is surfaced. The
    /// old worker's WASM blob URL is revoked once its replacement exists.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::JsError`] if the replacement worker
    /// cannot be created.
    pub fn cancel(&self) -> Result<(), WorkerError> {
        self.inner.borrow().worker.terminate();
        self.generation.set(self.generation.get() + 1.0);
        if let Some(reject) = self.pending_reject.borrow_mut().take() {
            let _ = reject.call1(&JsValue::NULL, &JsValue::from_str(CANCELLED));
        }
        let next = create_worker(self.worker_js, self.worker_wasm)?;
        let retired = self.inner.borrow_mut().replace(next);
        retired.retire();
        Ok(())
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        let slot = self.inner.get_mut();
        slot.worker.terminate();
        web_sys::Url::revoke_object_url(&slot.wasm_url).ok();
    }
}

/// Rejection reason used by [`PipelineWorker::cancel`].
const CANCELLED: &str = "sigclean:cancelled";

fn field(target: &JsValue, key: &str) -> Option<JsValue> {
    js_sys::Reflect::get(target, &JsValue::from_str(key))
        .ok()
        .filter(|v| !v.is_undefined())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent_to_u8(percent: f64) -> u8 {
    percent.clamp(0.0, 100.0).round() as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn dimension(data: &JsValue, key: &str) -> Result<u32, WorkerError> {
    field(data, key)
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= f64::from(u32::MAX))
        .map(|v| v as u32)
        .ok_or_else(|| WorkerError::Protocol(format!("missing {key}")))
}

/// Decode a `kind: "done"` reply.
fn parse_done(data: &JsValue) -> Result<RgbaImage, WorkerError> {
    let ok = field(data, "ok").and_then(|v| v.as_bool()).unwrap_or(false);
    if !ok {
        let json = field(data, "errorJson")
            .and_then(|v| v.as_string())
            .ok_or_else(|| WorkerError::Protocol("missing errorJson".into()))?;
        let error = serde_json::from_str::<PipelineError>(&json)
            .map_err(|e| WorkerError::Protocol(format!("failed to deserialize error: {e}")))?;
        return Err(error.into());
    }

    let width = dimension(data, "width")?;
    let height = dimension(data, "height")?;
    let pixels = field(data, "pixels")
        .and_then(|v| v.dyn_into::<js_sys::Uint8Array>().ok())
        .ok_or_else(|| WorkerError::Protocol("missing pixels".into()))?
        .to_vec();
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        WorkerError::Protocol(format!("pixel buffer does not match {width}x{height}"))
    })
}

/// Create a web worker from embedded JS glue and WASM binary.
///
/// 1. Creates a Blob URL for the WASM binary
/// 2. Wraps the JS glue in a script that initialises from that URL
/// 3. Starts a Worker from a Blob URL of the wrapper
///
/// The wrapper URL is revoked immediately; the WASM URL is returned with
/// the worker and revoked when the worker is retired.
fn create_worker(
    worker_js: &str,
    worker_wasm: &[u8],
) -> Result<WorkerSlot<web_sys::Worker>, WorkerError> {
    let wasm_array = js_sys::Uint8Array::from(worker_wasm);
    let wasm_parts = js_sys::Array::new();
    wasm_parts.push(&wasm_array.buffer());
    let wasm_opts = web_sys::BlobPropertyBag::new();
    wasm_opts.set_type("application/wasm");
    let wasm_blob =
        web_sys::Blob::new_with_buffer_source_sequence_and_options(&wasm_parts, &wasm_opts)?;
    let wasm_url = web_sys::Url::create_object_url_with_blob(&wasm_blob)?;

    let wrapper_js = format!(
        r#"{worker_js}

wasm_bindgen("{wasm_url}")
    .catch(function(e) {{ console.error("sigclean worker init failed:", e); }});
"#
    );

    let js_parts = js_sys::Array::new();
    js_parts.push(&JsValue::from_str(&wrapper_js));
    let js_opts = web_sys::BlobPropertyBag::new();
    js_opts.set_type("application/javascript");
    let js_blob = web_sys::Blob::new_with_str_sequence_and_options(&js_parts, &js_opts)?;
    let js_url = web_sys::Url::create_object_url_with_blob(&js_blob)?;

    let worker = match web_sys::Worker::new(&js_url) {
        Ok(worker) => worker,
        Err(e) => {
            web_sys::Url::revoke_object_url(&wasm_url).ok();
            web_sys::Url::revoke_object_url(&js_url).ok();
            return Err(e.into());
        }
    };
    web_sys::Url::revoke_object_url(&js_url).ok();

    Ok(WorkerSlot { worker, wasm_url })
}

/// Create a JS Promise along with its resolve and reject functions.
fn new_promise() -> Result<(js_sys::Promise, js_sys::Function, js_sys::Function), WorkerError> {
    let resolve = Rc::new(RefCell::new(None::<js_sys::Function>));
    let reject = Rc::new(RefCell::new(None::<js_sys::Function>));
    let resolve_clone = Rc::clone(&resolve);
    let reject_clone = Rc::clone(&reject);

    let promise = js_sys::Promise::new(&mut move |res, rej| {
        *resolve_clone.borrow_mut() = Some(res);
        *reject_clone.borrow_mut() = Some(rej);
    });

    let resolve_fn = resolve.borrow_mut().take();
    let reject_fn = reject.borrow_mut().take();
    match (resolve_fn, reject_fn) {
        (Some(res), Some(rej)) => Ok((promise, res, rej)),
        _ => Err(WorkerError::JsError("promise executor did not run".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_a_slot_hands_back_the_old_wasm_url() {
        let mut slot = WorkerSlot {
            worker: 1u8,
            wasm_url: "blob:first".to_owned(),
        };
        let retired = slot.replace(WorkerSlot {
            worker: 2,
            wasm_url: "blob:second".to_owned(),
        });
        assert_eq!(retired.worker, 1);
        assert_eq!(retired.wasm_url, "blob:first");
        assert_eq!(slot.wasm_url, "blob:second");

        let retired = slot.replace(WorkerSlot {
            worker: 3,
            wasm_url: "blob:third".to_owned(),
        });
        assert_eq!(retired.wasm_url, "blob:second");
    }

    #[test]
    fn percent_is_clamped_and_rounded() {
        assert_eq!(percent_to_u8(-3.0), 0);
        assert_eq!(percent_to_u8(49.6), 50);
        assert_eq!(percent_to_u8(140.0), 100);
    }
}
