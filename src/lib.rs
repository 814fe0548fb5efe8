pub mod client;
pub mod config;
pub mod encoder;
pub mod error;
pub mod form;
pub mod poller;
pub mod runtime;
pub mod viewer;

use std::time::Duration;

use eframe::egui;

use crate::client::TaskClient;
use crate::config::{ApiKey, ServiceConfig};
use crate::encoder::UploadedImage;
use crate::form::UploadForm;
use crate::poller::{Command, Phase};
use crate::runtime::{Event, Runtime};
use crate::viewer::ModelViewer;

/// Longest side of the preview texture, in pixels.
const PREVIEW_MAX_SIDE: u32 = 512;

pub struct PhotomeshApp {
    config: ServiceConfig,
    /// Contents of the API key field; turned into `config.api_key` on edit.
    api_key_input: String,
    form: UploadForm<egui::TextureHandle>,
    /// Client of the running session, used for its polls and the model download.
    session_client: Option<TaskClient>,
    viewer: ModelViewer,
    runtime: Runtime,
}

impl PhotomeshApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: ServiceConfig) -> std::io::Result<Self> {
        Ok(Self {
            api_key_input: String::new(),
            form: UploadForm::new(config.poll),
            session_client: None,
            viewer: ModelViewer::default(),
            runtime: Runtime::new(cc.egui_ctx.clone())?,
            config,
        })
    }

    fn handle(&mut self, ctx: &egui::Context, event: Event, now: Duration) {
        match event {
            Event::Picked(Ok(image)) => {
                let preview = load_preview(ctx, &image);
                self.viewer.clear();
                self.session_client = None;
                self.form.select_image(image, preview);
            }
            Event::Picked(Err(err)) => self.form.report_read_error(err),
            Event::Created { ticket, result } => self.form.apply_created(ticket, result, now),
            Event::Status { ticket, result } => {
                if let Some(url) = self.form.apply_status(ticket, result, now) {
                    if let Some(client) = &self.session_client {
                        let load = self.viewer.begin_load(url.clone());
                        self.runtime.load_model(client, load, url);
                    }
                }
            }
            Event::ModelLoaded { ticket, result } => {
                self.viewer.finish_load(ticket, result);
            }
        }
    }

    fn run(&self, command: Command) {
        match &self.session_client {
            Some(client) => self.runtime.dispatch(client, command),
            None => log::error!("no client for {:?}", command.ticket()),
        }
    }

    fn submit(&mut self) {
        let client = TaskClient::new(&self.config);
        match self.form.submit(self.config.options, client.is_some()) {
            Ok(command) => {
                self.viewer.clear();
                self.session_client = client;
                self.run(command);
            }
            Err(err) => log::info!("submission blocked: {err}"),
        }
    }

    fn remove_image(&mut self) {
        self.form.remove_image();
        self.viewer.clear();
        self.session_client = None;
    }

    fn form_ui(&mut self, ui: &mut egui::Ui) {
        ui.heading("Upload Your Image");
        ui.separator();

        ui.label("Choose an image");
        ui.horizontal(|ui| {
            if ui.button("Browse…").clicked() {
                self.runtime.pick_image();
            }
            if let Some(image) = self.form.image() {
                ui.label(&image.file_name).on_hover_text(image.mime_label());
            }
        });
        if let Some(err) = self.form.validation() {
            ui.colored_label(ui.visuals().error_fg_color, err.to_string());
        }

        if let Some(texture) = self.form.preview() {
            ui.add_space(6.0);
            ui.label("Preview:");
            ui.add(egui::Image::new(texture).max_height(240.0).max_width(ui.available_width()));
        }
        if self.form.image().is_some() && ui.button("Remove image").clicked() {
            self.remove_image();
        }

        ui.separator();
        ui.collapsing("Generation options", |ui| {
            let options = &mut self.config.options;
            ui.checkbox(&mut options.enable_pbr, "PBR materials");
            ui.checkbox(&mut options.should_remesh, "Remesh");
            ui.checkbox(&mut options.should_texture, "Texture");
        });

        ui.add_space(6.0);
        if ui
            .add_sized([ui.available_width(), 28.0], egui::Button::new("Generate 3D model"))
            .clicked()
        {
            self.submit();
        }

        ui.add_space(6.0);
        self.status_ui(ui);
    }

    fn status_ui(&mut self, ui: &mut egui::Ui) {
        let mut cancel = false;
        match self.form.phase() {
            Phase::Idle => {}
            Phase::Submitting => {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label("Uploading…");
                });
            }
            Phase::Polling { status, progress, failures, .. } => {
                let fraction = f32::from(progress.unwrap_or(0)) / 100.0;
                ui.add(egui::ProgressBar::new(fraction).show_percentage().animate(true));
                ui.label(format!("Generating ({})", status.as_str()));
                if *failures > 0 {
                    ui.weak(format!("connection trouble, retry {failures}"));
                }
                cancel = ui.button("Cancel").clicked();
            }
            Phase::Succeeded { task_id, .. } => {
                ui.label(format!("✔ Model ready ({task_id})"));
            }
            Phase::Failed(reason) => {
                ui.colored_label(ui.visuals().error_fg_color, format!("✖ {reason}"));
            }
            Phase::Cancelled => {
                ui.weak("Cancelled");
            }
        }
        if cancel {
            self.form.cancel();
            self.session_client = None;
        }
    }

    fn settings_ui(&mut self, ui: &mut egui::Ui) {
        ui.collapsing("Settings", |ui| {
            ui.label("API key");
            let field = egui::TextEdit::singleline(&mut self.api_key_input)
                .password(true)
                .hint_text(if self.config.api_key.is_some() { "configured" } else { "msy_…" });
            if ui.add(field).changed() {
                if let Some(key) = ApiKey::new(self.api_key_input.as_str()) {
                    self.config.api_key = Some(key);
                }
            }
            if self.config.api_key.is_some() && ui.small_button("Forget key").clicked() {
                self.config.api_key = None;
                self.api_key_input.clear();
            }

            ui.label("Service URL");
            ui.text_edit_singleline(&mut self.config.base_url);

            ui.horizontal(|ui| {
                ui.label("Poll every (s):");
                let mut secs = self.config.poll.interval.as_secs_f32();
                if ui.add(egui::DragValue::new(&mut secs).speed(0.1).range(1.0..=60.0)).changed() {
                    self.config.poll.interval = Duration::from_secs_f32(secs);
                    self.form.set_poll_policy(self.config.poll);
                }
            });
        });
    }

    fn viewer_controls_ui(&mut self, ui: &mut egui::Ui) {
        ui.collapsing("Viewer", |ui| {
            ui.checkbox(&mut self.viewer.show_grid, "grid");
            if ui.button("Reset view").clicked() {
                self.viewer.reset_view();
            }
            if let Some(mesh) = self.viewer.mesh() {
                ui.weak(format!("{} triangles", mesh.triangle_count()));
            }
            if let Some(url) = self.form.model_url() {
                ui.hyperlink_to("Download GLB", url);
            }
        });
    }

    fn alert_ui(&mut self, ctx: &egui::Context) {
        let Some(message) = self.form.alert().map(str::to_owned) else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new("Something went wrong")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label(message);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.form.dismiss_alert();
        }
    }
}

impl eframe::App for PhotomeshApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        let now = Duration::from_secs_f64(ctx.input(|i| i.time));

        for event in self.runtime.drain() {
            self.handle(ctx, event, now);
        }
        if let Some(command) = self.form.tick(now) {
            self.run(command);
        }
        if let Some(due) = self.form.next_deadline() {
            ctx.request_repaint_after(due.saturating_sub(now));
        }

        // ------------------------------------------------------------------
        // Sidebar
        // ------------------------------------------------------------------
        egui::SidePanel::left("side_panel")
            .resizable(false)
            .min_width(260.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.form_ui(ui);
                    ui.separator();
                    self.viewer_controls_ui(ui);
                    self.settings_ui(ui);
                });
            });

        // ------------------------------------------------------------------
        // Main viewport
        // ------------------------------------------------------------------
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.set_min_size(ui.available_size());
            self.viewer.show(ui, frame);
        });

        self.alert_ui(ctx);
    }

    fn on_exit(&mut self, gl: Option<&glow::Context>) {
        self.form.cancel();
        self.viewer.destroy(gl);
    }
}

/// Decode a downscaled copy of the image into a texture. Types the decoder
/// does not know simply get no preview.
fn load_preview(ctx: &egui::Context, upload: &UploadedImage) -> Option<egui::TextureHandle> {
    let decoded = match image::load_from_memory(&upload.bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::debug!("no preview for {}: {e}", upload.file_name);
            return None;
        }
    };
    let rgba = decoded.thumbnail(PREVIEW_MAX_SIDE, PREVIEW_MAX_SIDE).to_rgba8();
    let size = [rgba.width() as usize, rgba.height() as usize];
    let color = egui::ColorImage::from_rgba_unmultiplied(size, rgba.as_raw());
    Some(ctx.load_texture(format!("preview:{}", upload.file_name), color, egui::TextureOptions::LINEAR))
}

// ── Web entry‑point ──
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
const CANVAS_ID: &str = "photomesh_canvas";

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub async fn start() -> Result<(), JsValue> {
    use wasm_bindgen::JsCast as _;

    // Redirect `log` macros & panic messages to the browser console
    eframe::WebLogger::init(log::LevelFilter::Debug).ok();
    console_error_panic_hook::set_once();

    let canvas = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id(CANVAS_ID))
        .ok_or_else(|| JsValue::from_str("canvas element missing"))?
        .dyn_into::<web_sys::HtmlCanvasElement>()
        .map_err(|_| JsValue::from_str("element is not a canvas"))?;

    let web_options = eframe::WebOptions { depth_buffer: 24, ..Default::default() };

    eframe::WebRunner::new()
        .start(
            canvas,
            web_options,
            Box::new(|cc| Ok(Box::new(PhotomeshApp::new(cc, ServiceConfig::default())?))),
        )
        .await?;

    Ok(())
}
