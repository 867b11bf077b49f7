// ============================================================================
// GENERATION: quality tiers, the edit service seam, and job orchestration
// ============================================================================

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use crate::backend::{AccountBackend, BackendError, JobId, JobRecord, JobStatus};
use crate::compositor;
use crate::ids::ImageId;
use crate::model::{Canvas, Image};

// ============================================================================
// Quality tiers
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Free,
    #[default]
    Standard,
    High,
    Ultra,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Free,
        QualityTier::Standard,
        QualityTier::High,
        QualityTier::Ultra,
    ];

    pub fn label(self) -> &'static str {
        match self {
            QualityTier::Free => "Free",
            QualityTier::Standard => "Standard",
            QualityTier::High => "High",
            QualityTier::Ultra => "Ultra",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierSpec {
    pub model: String,
    /// Longest output edge in pixels.
    pub resolution: u32,
    pub credit_cost: u32,
    /// Drives the placeholder progress bar.
    pub estimated_secs: f32,
}

impl TierSpec {
    fn new(model: &str, resolution: u32, credit_cost: u32, estimated_secs: f32) -> Self {
        Self {
            model: model.to_string(),
            resolution,
            credit_cost,
            estimated_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub free: TierSpec,
    pub standard: TierSpec,
    pub high: TierSpec,
    pub ultra: TierSpec,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            free: TierSpec::new("edit-lite", 1024, 0, 12.0),
            standard: TierSpec::new("edit-standard", 1024, 1, 15.0),
            high: TierSpec::new("edit-pro", 2048, 2, 30.0),
            ultra: TierSpec::new("edit-pro", 4096, 4, 60.0),
        }
    }
}

impl TierTable {
    pub fn spec(&self, tier: QualityTier) -> &TierSpec {
        match tier {
            QualityTier::Free => &self.free,
            QualityTier::Standard => &self.standard,
            QualityTier::High => &self.high,
            QualityTier::Ultra => &self.ultra,
        }
    }
}

// ============================================================================
// Service seam
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceImage {
    pub png: Vec<u8>,
    pub label: Option<String>,
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub source_png: Vec<u8>,
    pub prompt: String,
    /// Context composite; `None` applies the edit to the whole image.
    pub mask_png: Option<Vec<u8>>,
    pub model: String,
    pub resolution: u32,
    pub references: Vec<ReferenceImage>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Clone, Debug)]
pub struct GenerationResponse {
    /// Encoded image (any format `image` can decode).
    pub image: Vec<u8>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationError {
    NoSource,
    SourceNotReady,
    EmptyPrompt,
    InsufficientCredits { needed: u32, available: u32 },
    Backend(BackendError),
    Encode(String),
    Service(String),
    Decode(String),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::NoSource => write!(f, "Select an image to edit first"),
            GenerationError::SourceNotReady => write!(f, "That image is still being generated"),
            GenerationError::EmptyPrompt => write!(f, "Describe the change you want"),
            GenerationError::InsufficientCredits { needed, available } => write!(
                f,
                "Not enough credits: {} needed, {} available",
                needed, available
            ),
            GenerationError::Backend(e) => write!(f, "Account error: {}", e),
            GenerationError::Encode(msg) => write!(f, "Could not prepare the image: {}", msg),
            GenerationError::Service(msg) => write!(f, "Generation failed: {}", msg),
            GenerationError::Decode(msg) => write!(f, "Could not read the generated image: {}", msg),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<BackendError> for GenerationError {
    fn from(e: BackendError) -> Self {
        GenerationError::Backend(e)
    }
}

/// The remote image-edit model, seen as a black box.
pub trait GenerationService: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError>;
}

// ============================================================================
// HTTP client for the edit proxy
// ============================================================================

#[derive(Serialize)]
struct WireReference<'a> {
    image: String,
    label: Option<&'a str>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    resolution: u32,
    image: String,
    mask: Option<String>,
    references: Vec<WireReference<'a>>,
}

#[derive(Deserialize)]
struct WireResponse {
    image: String,
    #[serde(default)]
    usage: Usage,
}

/// Posts base64 JSON to the proxy, which holds the provider credential.
pub struct HttpGenerationService {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpGenerationService {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GenerationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| GenerationError::Service(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

impl GenerationService for HttpGenerationService {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        let b64 = |bytes: &[u8]| general_purpose::STANDARD.encode(bytes);
        let body = WireRequest {
            model: &request.model,
            prompt: &request.prompt,
            resolution: request.resolution,
            image: b64(&request.source_png),
            mask: request.mask_png.as_deref().map(b64),
            references: request
                .references
                .iter()
                .map(|r| WireReference {
                    image: b64(&r.png),
                    label: r.label.as_deref(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::Service(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .text()
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(GenerationError::Service(format!("{}: {}", status, detail)));
        }

        let wire: WireResponse = response
            .json()
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        let image = general_purpose::STANDARD
            .decode(wire.image.as_bytes())
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        Ok(GenerationResponse {
            image,
            usage: wire.usage,
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// What happened to a placeholder when its job reported back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    Completed { placeholder: ImageId },
    /// The placeholder is gone; selection should fall back to `source`.
    RolledBack { placeholder: ImageId, source: ImageId },
    /// The placeholder was deleted while its job was running.
    Discarded { placeholder: ImageId },
}

struct JobResult {
    placeholder: ImageId,
    result: Result<GenerationResponse, GenerationError>,
}

struct PendingJob {
    source: ImageId,
    user: String,
    debited: u32,
    job: Option<JobId>,
    batch: Option<u64>,
}

struct BatchState {
    remaining: usize,
    alerted: bool,
}

pub struct GenerationOrchestrator {
    service: Arc<dyn GenerationService>,
    backend: Arc<dyn AccountBackend>,
    pub tiers: TierTable,
    sender: mpsc::Sender<JobResult>,
    receiver: mpsc::Receiver<JobResult>,
    pending: HashMap<ImageId, PendingJob>,
    batches: HashMap<u64, BatchState>,
    next_batch: u64,
    alerts: Vec<String>,
}

impl GenerationOrchestrator {
    pub fn new(service: Arc<dyn GenerationService>, backend: Arc<dyn AccountBackend>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            service,
            backend,
            tiers: TierTable::default(),
            sender,
            receiver,
            pending: HashMap::new(),
            batches: HashMap::new(),
            next_batch: 0,
            alerts: Vec::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Current balance of the signed-in user.
    pub fn credits(&self) -> Result<u32, GenerationError> {
        let user = self.backend.current_user()?;
        Ok(self.backend.profile(&user)?.credits)
    }

    /// User-facing failure messages collected since the last call.
    pub fn take_alerts(&mut self) -> Vec<String> {
        std::mem::take(&mut self.alerts)
    }

    /// Start one generation per source image.
    ///
    /// Validation happens before anything is touched. On success the credits
    /// are debited, a placeholder is inserted after each source, and the
    /// placeholder ids are returned in source order.
    pub fn start(
        &mut self,
        canvas: &mut Canvas,
        sources: &[ImageId],
        prompt: &str,
        tier: QualityTier,
        now: f64,
    ) -> Result<Vec<ImageId>, GenerationError> {
        let prompt = prompt.trim();
        let sources: Vec<&Image> = sources.iter().filter_map(|id| canvas.image(*id)).collect();
        if sources.is_empty() {
            return Err(GenerationError::NoSource);
        }
        if sources.iter().any(|img| img.is_pending()) {
            return Err(GenerationError::SourceNotReady);
        }
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let spec = self.tiers.spec(tier).clone();
        let per_item = spec.credit_cost;
        let user = self.backend.current_user()?;
        let available = self.backend.profile(&user)?.credits;
        let needed = u32::try_from(sources.len())
            .ok()
            .and_then(|n| per_item.checked_mul(n))
            .ok_or(GenerationError::InsufficientCredits {
                needed: u32::MAX,
                available,
            })?;
        if available < needed {
            return Err(GenerationError::InsufficientCredits { needed, available });
        }

        let mut prepared = Vec::with_capacity(sources.len());
        for source in &sources {
            let request = build_request(source, prompt, &spec)?;
            let placeholder = Image::placeholder(source, prompt, now, spec.estimated_secs);
            prepared.push((source.id, placeholder, request));
        }

        self.backend.update_credits(&user, available - needed)?;

        let batch = if prepared.len() > 1 {
            let id = self.next_batch;
            self.next_batch += 1;
            self.batches.insert(
                id,
                BatchState {
                    remaining: prepared.len(),
                    alerted: false,
                },
            );
            Some(id)
        } else {
            None
        };

        let mut placeholders = Vec::with_capacity(prepared.len());
        for (source, placeholder, request) in prepared {
            let placeholder_id = placeholder.id;
            canvas.insert_after(source, placeholder);

            let job = match self.backend.create_job(JobRecord {
                user: user.clone(),
                prompt: prompt.to_string(),
                credit_cost: per_item,
                status: JobStatus::Running,
            }) {
                Ok(id) => Some(id),
                Err(e) => {
                    crate::log_warn!("job record for {} not created: {}", placeholder_id, e);
                    None
                }
            };
            self.pending.insert(
                placeholder_id,
                PendingJob {
                    source,
                    user: user.clone(),
                    debited: per_item,
                    job,
                    batch,
                },
            );

            crate::log_event!(
                "INFO",
                "generation.started",
                placeholder = placeholder_id,
                source = source,
                job = job.map_or_else(|| "-".to_string(), |j| j.0.to_string()),
                model = spec.model,
            );

            // Blocking network call: a plain thread, never the shared rayon pool.
            let service = Arc::clone(&self.service);
            let sender = self.sender.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("generation-{}", placeholder_id))
                .spawn(move || {
                    let result = service.generate(&request);
                    let _ = sender.send(JobResult {
                        placeholder: placeholder_id,
                        result,
                    });
                });
            if let Err(e) = spawned {
                let _ = self.sender.send(JobResult {
                    placeholder: placeholder_id,
                    result: Err(GenerationError::Service(format!("could not start job: {}", e))),
                });
            }
            placeholders.push(placeholder_id);
        }

        crate::log_info!(
            "started {} generation(s) on {} ({} credits)",
            placeholders.len(),
            spec.model,
            needed
        );
        Ok(placeholders)
    }

    /// Commit every finished job. Call once per frame on the UI thread.
    pub fn poll(&mut self, canvas: &mut Canvas) -> Vec<GenerationEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            let Some(job) = self.pending.remove(&msg.placeholder) else {
                continue;
            };
            let outcome = msg.result.and_then(|resp| decode(&resp.image));

            match outcome {
                Ok(pixels) => {
                    match canvas.image_mut(msg.placeholder) {
                        Some(img) => {
                            img.complete_with(pixels);
                            crate::log_event!(
                                "INFO",
                                "generation.completed",
                                placeholder = msg.placeholder,
                                version = img.version,
                            );
                            events.push(GenerationEvent::Completed {
                                placeholder: msg.placeholder,
                            });
                        }
                        None => {
                            crate::log_info!("result for deleted {} dropped", msg.placeholder);
                            events.push(GenerationEvent::Discarded {
                                placeholder: msg.placeholder,
                            });
                        }
                    }
                    self.record_status(&job, JobStatus::Succeeded);
                }
                Err(e) => {
                    crate::log_event!(
                        "WARN",
                        "generation.failed",
                        placeholder = msg.placeholder,
                        source = job.source,
                        error = e,
                    );
                    self.roll_back(canvas, msg.placeholder, &job, &e);
                    self.record_status(&job, JobStatus::Failed(e.to_string()));
                    events.push(GenerationEvent::RolledBack {
                        placeholder: msg.placeholder,
                        source: job.source,
                    });
                }
            }
            self.finish_batch_member(job.batch);
        }
        events
    }

    fn roll_back(&mut self, canvas: &mut Canvas, placeholder: ImageId, job: &PendingJob, error: &GenerationError) {
        canvas.remove_image(placeholder);

        // Re-read: the balance may have moved while the job ran.
        let refund = self
            .backend
            .profile(&job.user)
            .and_then(|p| {
                self.backend
                    .update_credits(&job.user, p.credits.saturating_add(job.debited))
            });
        if let Err(e) = refund {
            crate::log_err!("refund of {} credits to {} failed: {}", job.debited, job.user, e);
        }

        match job.batch.and_then(|b| self.batches.get_mut(&b)) {
            None => self.alerts.push(error.to_string()),
            Some(batch) if !batch.alerted => {
                batch.alerted = true;
                self.alerts
                    .push(format!("Some images in this batch could not be generated. {}", error));
            }
            Some(_) => {
                crate::log_warn!("batch member {} failed: {}", placeholder, error);
            }
        }
    }

    fn record_status(&self, job: &PendingJob, status: JobStatus) {
        if let Some(id) = job.job
            && let Err(e) = self.backend.update_job(id, status)
        {
            crate::log_warn!("job {:?} not updated: {}", id, e);
        }
    }

    fn finish_batch_member(&mut self, batch: Option<u64>) {
        let Some(id) = batch else { return };
        let done = match self.batches.get_mut(&id) {
            Some(state) => {
                state.remaining = state.remaining.saturating_sub(1);
                state.remaining == 0
            }
            None => false,
        };
        if done {
            self.batches.remove(&id);
        }
    }
}

fn build_request(source: &Image, prompt: &str, spec: &TierSpec) -> Result<GenerationRequest, GenerationError> {
    let pixels = source.pixels.as_ref().ok_or(GenerationError::SourceNotReady)?;
    let source_png = compositor::encode_png(pixels).map_err(|e| GenerationError::Encode(e.to_string()))?;
    Ok(GenerationRequest {
        source_png,
        prompt: prompt.to_string(),
        mask_png: compositor::context_png(source),
        model: spec.model.clone(),
        resolution: spec.resolution,
        references: compositor::reference_images(&source.annotations),
    })
}

fn decode(bytes: &[u8]) -> Result<image::RgbaImage, GenerationError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| GenerationError::Decode(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Service that answers every request with a fixed result and records
    /// what it was sent.
    pub(crate) struct ScriptedService {
        pub fail_with: Option<String>,
        pub seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedService {
        pub fn ok() -> Self {
            Self {
                fail_with: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(msg: &str) -> Self {
            Self {
                fail_with: Some(msg.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl GenerationService for ScriptedService {
        fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.fail_with {
                Some(msg) => Err(GenerationError::Service(msg.clone())),
                None => {
                    let out = RgbaImage::from_pixel(64, 32, Rgba([1, 2, 3, 255]));
                    Ok(GenerationResponse {
                        image: compositor::encode_png(&out).unwrap(),
                        usage: Usage::default(),
                    })
                }
            }
        }
    }

    pub(crate) fn poll_until_idle(orch: &mut GenerationOrchestrator, canvas: &mut Canvas) -> Vec<GenerationEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while orch.in_flight() > 0 && Instant::now() < deadline {
            events.extend(orch.poll(canvas));
            std::thread::sleep(Duration::from_millis(5));
        }
        events
    }

    fn setup(service: ScriptedService, credits: u32, uploads: usize) -> (GenerationOrchestrator, Arc<MemoryBackend>, Canvas, Vec<ImageId>) {
        let backend = Arc::new(MemoryBackend::signed_in("ana", credits));
        let orch = GenerationOrchestrator::new(Arc::new(service), backend.clone());
        let mut canvas = Canvas::new();
        let imgs: Vec<Image> = (0..uploads)
            .map(|_| Image::from_upload("room.png", RgbaImage::from_pixel(32, 32, Rgba([9, 9, 9, 255]))))
            .collect();
        let ids = imgs.iter().map(|i| i.id).collect();
        canvas.add_row("batch", imgs);
        (orch, backend, canvas, ids)
    }

    fn balance(backend: &MemoryBackend) -> u32 {
        backend.profile("ana").unwrap().credits
    }

    #[test]
    fn validation_touches_nothing() {
        let (mut orch, backend, mut canvas, ids) = setup(ScriptedService::ok(), 1, 2);

        assert_eq!(orch.start(&mut canvas, &[], "sofa", QualityTier::Standard, 0.0), Err(GenerationError::NoSource));
        assert_eq!(orch.start(&mut canvas, &ids[..1], "   ", QualityTier::Standard, 0.0), Err(GenerationError::EmptyPrompt));
        assert_eq!(
            orch.start(&mut canvas, &ids, "sofa", QualityTier::Standard, 0.0),
            Err(GenerationError::InsufficientCredits { needed: 2, available: 1 })
        );
        assert_eq!(canvas.image_count(), 2);
        assert_eq!(balance(&backend), 1);
        assert_eq!(orch.in_flight(), 0);
    }

    #[test]
    fn success_debits_and_completes_placeholder() {
        let (mut orch, backend, mut canvas, ids) = setup(ScriptedService::ok(), 5, 2);
        let started = orch
            .start(&mut canvas, &ids[..1], "add a sofa", QualityTier::High, 1.0)
            .unwrap();
        assert_eq!(started.len(), 1);
        let placeholder = started[0];
        assert_eq!(balance(&backend), 3);
        assert_eq!(canvas.order(), vec![ids[0], placeholder, ids[1]]);
        assert!(canvas.image(placeholder).unwrap().is_pending());

        let events = poll_until_idle(&mut orch, &mut canvas);
        assert_eq!(events, vec![GenerationEvent::Completed { placeholder }]);
        let img = canvas.image(placeholder).unwrap();
        assert!(!img.is_pending());
        assert_eq!(img.version, 2);
        assert_eq!(img.parent, Some(ids[0]));
        assert_eq!(balance(&backend), 3);
        assert!(backend.jobs().iter().all(|j| j.status == JobStatus::Succeeded));
        assert!(orch.take_alerts().is_empty());
    }

    #[test]
    fn annotated_source_sends_mask() {
        let service = Arc::new(ScriptedService::ok());
        let backend = Arc::new(MemoryBackend::signed_in("ana", 5));
        let mut orch = GenerationOrchestrator::new(service.clone(), backend);
        let mut canvas = Canvas::new();
        let mut img = Image::from_upload("room.png", RgbaImage::new(32, 32));
        img.add_annotation(crate::model::Annotation::stamp(
            crate::model::ImagePoint::new(20.0, 20.0),
            "pin",
            [255, 0, 0, 255],
        ));
        let id = img.id;
        canvas.add_row("one", vec![img]);

        orch.start(&mut canvas, &[id], "sofa here", QualityTier::Free, 0.0).unwrap();
        poll_until_idle(&mut orch, &mut canvas);
        let seen = service.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].mask_png.is_some());
        assert_eq!(seen[0].model, "edit-lite");
    }

    #[test]
    fn failure_rolls_back_and_refunds_against_fresh_balance() {
        let (mut orch, backend, mut canvas, ids) = setup(ScriptedService::failing("model overloaded"), 4, 1);
        let placeholder = orch
            .start(&mut canvas, &ids, "add a sofa", QualityTier::Standard, 0.0)
            .unwrap()[0];
        assert_eq!(balance(&backend), 3);
        // Credits topped up elsewhere while the job runs.
        backend.update_credits("ana", 10).unwrap();

        let events = poll_until_idle(&mut orch, &mut canvas);
        assert_eq!(
            events,
            vec![GenerationEvent::RolledBack {
                placeholder,
                source: ids[0]
            }]
        );
        assert!(!canvas.contains(placeholder));
        assert_eq!(canvas.order(), ids);
        assert_eq!(balance(&backend), 11);
        let alerts = orch.take_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].contains("model overloaded"));
        assert!(matches!(backend.jobs()[0].status, JobStatus::Failed(_)));
    }

    #[test]
    fn batch_failure_alerts_once() {
        let (mut orch, backend, mut canvas, ids) = setup(ScriptedService::failing("timeout"), 9, 3);
        let started = orch
            .start(&mut canvas, &ids, "brighter", QualityTier::Standard, 0.0)
            .unwrap();
        assert_eq!(started.len(), 3);
        assert_eq!(balance(&backend), 6);

        let events = poll_until_idle(&mut orch, &mut canvas);
        assert_eq!(events.len(), 3);
        assert_eq!(balance(&backend), 9);
        assert_eq!(canvas.order(), ids);
        assert_eq!(orch.take_alerts().len(), 1);
    }

    #[test]
    fn deleted_placeholder_discards_result() {
        let (mut orch, _backend, mut canvas, ids) = setup(ScriptedService::ok(), 2, 1);
        let placeholder = orch
            .start(&mut canvas, &ids, "sofa", QualityTier::Standard, 0.0)
            .unwrap()[0];
        canvas.remove_image(placeholder);
        let events = poll_until_idle(&mut orch, &mut canvas);
        assert_eq!(events, vec![GenerationEvent::Discarded { placeholder }]);
        assert_eq!(canvas.order(), ids);
    }

    #[test]
    fn pending_source_is_rejected() {
        let (mut orch, _backend, mut canvas, ids) = setup(ScriptedService::ok(), 5, 1);
        let placeholder = orch
            .start(&mut canvas, &ids, "sofa", QualityTier::Standard, 0.0)
            .unwrap()[0];
        assert_eq!(
            orch.start(&mut canvas, &[placeholder], "again", QualityTier::Standard, 0.0),
            Err(GenerationError::SourceNotReady)
        );
        poll_until_idle(&mut orch, &mut canvas);
    }

    /// Holds every request until released (or a few seconds pass).
    struct GatedService {
        released: std::sync::atomic::AtomicBool,
    }

    impl GenerationService for GatedService {
        fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
            let deadline = Instant::now() + Duration::from_secs(3);
            while !self.released.load(std::sync::atomic::Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            ScriptedService::ok().generate(request)
        }
    }

    #[test]
    fn slow_jobs_do_not_stall_the_next_request() {
        let batch = rayon::current_num_threads() + 1;
        let service = Arc::new(GatedService {
            released: std::sync::atomic::AtomicBool::new(false),
        });
        let backend = Arc::new(MemoryBackend::signed_in("ana", 100));
        let mut orch = GenerationOrchestrator::new(service.clone(), backend);
        let mut canvas = Canvas::new();
        let imgs: Vec<Image> = (0..=batch)
            .map(|_| Image::from_upload("room.png", RgbaImage::from_pixel(64, 64, Rgba([9, 9, 9, 255]))))
            .collect();
        let ids: Vec<ImageId> = imgs.iter().map(|i| i.id).collect();
        canvas.add_row("batch", imgs);

        orch.start(&mut canvas, &ids[..batch], "sofa", QualityTier::Standard, 0.0)
            .unwrap();

        let last = ids[batch];
        canvas.image_mut(last).unwrap().add_annotation(crate::model::Annotation::stamp(
            crate::model::ImagePoint::new(40.0, 40.0),
            "pin",
            [255, 0, 0, 255],
        ));
        let started = Instant::now();
        orch.start(&mut canvas, &[last], "lamp", QualityTier::Standard, 0.0)
            .unwrap();
        let waited = started.elapsed();

        service.released.store(true, std::sync::atomic::Ordering::SeqCst);
        poll_until_idle(&mut orch, &mut canvas);
        assert!(waited < Duration::from_millis(1500), "start() waited {:?}", waited);
        assert_eq!(orch.in_flight(), 0);
    }

    #[test]
    fn oversized_cost_is_insufficient_credits() {
        let (mut orch, backend, mut canvas, ids) = setup(ScriptedService::ok(), 10, 2);
        orch.tiers.ultra.credit_cost = u32::MAX;
        assert_eq!(
            orch.start(&mut canvas, &ids, "sofa", QualityTier::Ultra, 0.0),
            Err(GenerationError::InsufficientCredits {
                needed: u32::MAX,
                available: 10
            })
        );
        assert_eq!(balance(&backend), 10);
        assert_eq!(canvas.image_count(), 2);
    }

    #[test]
    fn refund_saturates_at_the_balance_ceiling() {
        let (mut orch, backend, mut canvas, ids) = setup(ScriptedService::failing("down"), 4, 1);
        orch.start(&mut canvas, &ids, "sofa", QualityTier::Ultra, 0.0)
            .unwrap();
        backend.update_credits("ana", u32::MAX - 1).unwrap();
        poll_until_idle(&mut orch, &mut canvas);
        assert_eq!(balance(&backend), u32::MAX);
        assert_eq!(canvas.order(), ids);
    }
}
