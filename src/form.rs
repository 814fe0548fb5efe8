//! State behind the upload form.
//!
//! `P` is whatever owns the preview's resources (an egui texture in the
//! app). The form keeps at most one and releases it by dropping it.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{TaskId, TaskSnapshot};
use crate::config::{GenerationOptions, PollPolicy};
use crate::encoder::{ImageMime, UploadedImage};
use crate::error::{PollError, ReadError, SubmissionError, ValidationError};
use crate::poller::{Command, Phase, PollingController, Ticket};

pub struct UploadForm<P> {
    image: Option<UploadedImage>,
    preview: Option<P>,
    controller: PollingController,
    model_url: Option<String>,
    validation: Option<ValidationError>,
    alert: Option<String>,
}

impl<P> UploadForm<P> {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            image: None,
            preview: None,
            controller: PollingController::new(policy),
            model_url: None,
            validation: None,
            alert: None,
        }
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn preview(&self) -> Option<&P> {
        self.preview.as_ref()
    }

    pub fn phase(&self) -> &Phase {
        self.controller.phase()
    }

    pub fn model_url(&self) -> Option<&str> {
        self.model_url.as_deref()
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        self.validation.as_ref()
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.controller.next_deadline()
    }

    pub fn set_poll_policy(&mut self, policy: PollPolicy) {
        self.controller.set_policy(policy);
    }

    /// Replace the selection. The old preview is dropped before the new one
    /// is stored and any running generation is cancelled.
    pub fn select_image(&mut self, image: UploadedImage, preview: Option<P>) {
        log::info!("selected {} ({})", image.file_name, image.mime_label());
        self.preview = None;
        self.clear_result();
        self.validation = None;
        self.image = Some(image);
        self.preview = preview;
    }

    pub fn remove_image(&mut self) {
        self.preview = None;
        self.image = None;
        self.validation = None;
        self.clear_result();
    }

    /// Validate and start a generation. Produces the single create command.
    pub fn submit(&mut self, options: GenerationOptions, has_api_key: bool) -> Result<Command, ValidationError> {
        let checked = self.validate(has_api_key);
        self.validation = checked.as_ref().err().cloned();
        let (mime, bytes) = checked?;
        self.model_url = None;
        self.alert = None;
        Ok(self.controller.submit(mime, bytes, options))
    }

    pub fn apply_created(&mut self, ticket: Ticket, result: Result<TaskId, SubmissionError>, now: Duration) {
        if self.controller.on_created(ticket, result, now) {
            self.raise_on_failure();
        }
    }

    /// Returns the model URL the first time the session succeeds.
    pub fn apply_status(
        &mut self,
        ticket: Ticket,
        result: Result<TaskSnapshot, PollError>,
        now: Duration,
    ) -> Option<String> {
        if !self.controller.on_status(ticket, result, now) {
            return None;
        }
        self.raise_on_failure();
        let url = self.controller.take_model_url()?;
        self.model_url = Some(url.clone());
        Some(url)
    }

    pub fn tick(&mut self, now: Duration) -> Option<Command> {
        self.controller.tick(now)
    }

    /// Cancel whatever is running without touching the selection.
    pub fn cancel(&mut self) -> bool {
        self.controller.cancel()
    }

    pub fn report_read_error(&mut self, err: ReadError) {
        log::error!("{err}");
        self.alert = Some(err.to_string());
    }

    pub fn report_alert(&mut self, message: impl Into<String>) {
        self.alert = Some(message.into());
    }

    fn validate(&self, has_api_key: bool) -> Result<(ImageMime, Arc<[u8]>), ValidationError> {
        let image = self.image.as_ref().ok_or(ValidationError::MissingImage)?;
        let mime = image.allowed_mime().ok_or_else(|| ValidationError::UnsupportedType {
            mime: image.mime_label().to_owned(),
        })?;
        if !has_api_key {
            return Err(ValidationError::MissingApiKey);
        }
        Ok((mime, image.bytes.clone()))
    }

    fn clear_result(&mut self) {
        self.controller.reset();
        self.model_url = None;
    }

    fn raise_on_failure(&mut self) {
        if let Phase::Failed(reason) = self.controller.phase() {
            self.alert = Some(reason.to_string());
        }
    }
}
