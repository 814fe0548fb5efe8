//! Interactive viewer for the generated model.

mod camera;
mod mesh;
mod renderer;

use std::sync::{Arc, Mutex};

use eframe::egui;

pub use camera::OrbitCamera;
pub use mesh::{MeshData, load_glb};
use renderer::GpuMesh;

/// Identifies one `begin_load`; results for older tickets are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerState {
    Empty,
    Loading { url: String },
    Ready { url: String, triangles: usize },
    Failed { url: String, message: String },
}

pub struct ModelViewer {
    state: ViewerState,
    generation: u64,
    mesh: Option<Arc<MeshData>>,
    /// Set when `mesh` changed and the GPU copy is stale.
    dirty: bool,
    camera: OrbitCamera,
    pub show_grid: bool,
    gpu: Option<Arc<Mutex<GpuMesh>>>,
}

impl Default for ModelViewer {
    fn default() -> Self {
        Self {
            state: ViewerState::Empty,
            generation: 0,
            mesh: None,
            dirty: false,
            camera: OrbitCamera::default(),
            show_grid: true,
            gpu: None,
        }
    }
}

impl ModelViewer {
    pub fn state(&self) -> &ViewerState {
        &self.state
    }

    pub fn mesh(&self) -> Option<&MeshData> {
        self.mesh.as_deref()
    }

    pub fn begin_load(&mut self, url: impl Into<String>) -> LoadTicket {
        self.generation += 1;
        self.set_mesh(None);
        self.camera = OrbitCamera::default();
        self.state = ViewerState::Loading { url: url.into() };
        LoadTicket(self.generation)
    }

    /// Returns `true` if the result belonged to the current load.
    pub fn finish_load(&mut self, ticket: LoadTicket, result: Result<MeshData, String>) -> bool {
        let ViewerState::Loading { url } = &self.state else {
            return false;
        };
        if ticket != LoadTicket(self.generation) {
            return false;
        }
        let url = url.clone();
        self.state = match result {
            Ok(mesh) => {
                let triangles = mesh.triangle_count();
                self.set_mesh(Some(Arc::new(mesh)));
                ViewerState::Ready { url, triangles }
            }
            Err(message) => {
                log::error!("model load failed: {message}");
                ViewerState::Failed { url, message }
            }
        };
        true
    }

    /// Drop the current model and ignore any load still running.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.set_mesh(None);
        self.state = ViewerState::Empty;
    }

    pub fn reset_view(&mut self) {
        self.camera = OrbitCamera::default();
    }

    fn set_mesh(&mut self, mesh: Option<Arc<MeshData>>) {
        self.mesh = mesh;
        self.dirty = true;
    }

    pub fn show(&mut self, ui: &mut egui::Ui, frame: &eframe::Frame) {
        match &self.state {
            ViewerState::Empty => {
                ui.centered_and_justified(|ui| {
                    ui.weak("Upload an image to generate a model");
                });
                return;
            }
            ViewerState::Loading { .. } => {
                ui.centered_and_justified(|ui| {
                    ui.spinner();
                });
                return;
            }
            ViewerState::Failed { message, .. } => {
                let message = message.clone();
                ui.centered_and_justified(|ui| {
                    ui.colored_label(ui.visuals().error_fg_color, format!("⚠ Could not load model: {message}"));
                });
                return;
            }
            ViewerState::Ready { .. } => {}
        }

        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::drag());

        // ───── Interaction ─────
        if response.dragged_by(egui::PointerButton::Primary) {
            self.camera.rotate(response.drag_delta());
        } else if response.dragged_by(egui::PointerButton::Secondary) {
            self.camera.pan += response.drag_delta();
        }
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll.abs() > 0.0 {
                self.camera.scroll(scroll);
            }
        }

        let Some(gl) = frame.gl() else {
            ui.colored_label(ui.visuals().error_fg_color, "OpenGL context unavailable");
            return;
        };
        let Some(mesh) = self.mesh.clone() else {
            return;
        };

        if self.gpu.is_none() {
            match unsafe { GpuMesh::new(gl) } {
                Ok(gpu) => self.gpu = Some(Arc::new(Mutex::new(gpu))),
                Err(e) => {
                    log::error!("could not set up renderer: {e}");
                    self.state = ViewerState::Failed {
                        url: String::new(),
                        message: format!("renderer: {e}"),
                    };
                    return;
                }
            }
        }
        let Some(gpu) = self.gpu.clone() else {
            return;
        };

        if self.dirty {
            if let Ok(mut gpu) = gpu.lock() {
                unsafe {
                    gpu.upload_mesh(gl, &mesh.interleaved());
                    gpu.upload_grid(gl, &renderer::grid_vertices(mesh.center, mesh.radius));
                }
                self.dirty = false;
            }
        }

        let mvp = self.camera.mvp(rect.size(), mesh.center, mesh.radius);
        let show_grid = self.show_grid;
        let callback = egui_glow::CallbackFn::new(move |_info, painter| {
            if let Ok(gpu) = gpu.lock() {
                unsafe { gpu.paint(painter.gl(), mvp, show_grid) };
            }
        });
        ui.painter().add(egui::PaintCallback { rect, callback: Arc::new(callback) });
    }

    pub fn destroy(&mut self, gl: Option<&glow::Context>) {
        if let (Some(gl), Some(gpu)) = (gl, self.gpu.take()) {
            if let Ok(gpu) = gpu.lock() {
                unsafe { gpu.destroy(gl) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> MeshData {
        MeshData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            center: [0.5, 0.5, 0.0],
            radius: 0.71,
        }
    }

    #[test]
    fn load_success_becomes_ready() {
        let mut viewer = ModelViewer::default();
        let ticket = viewer.begin_load("https://x/m.glb");
        assert!(matches!(viewer.state(), ViewerState::Loading { .. }));
        assert!(viewer.finish_load(ticket, Ok(triangle())));
        assert_eq!(
            viewer.state(),
            &ViewerState::Ready { url: "https://x/m.glb".into(), triangles: 1 }
        );
        assert!(viewer.mesh().is_some());
    }

    #[test]
    fn load_failure_is_reported_not_fatal() {
        let mut viewer = ModelViewer::default();
        let ticket = viewer.begin_load("https://x/broken.glb");
        viewer.finish_load(ticket, Err("asset contains no triangles".into()));
        assert!(matches!(viewer.state(), ViewerState::Failed { message, .. } if message.contains("triangles")));
        assert!(viewer.mesh().is_none());
    }

    #[test]
    fn stale_load_is_ignored() {
        let mut viewer = ModelViewer::default();
        let old = viewer.begin_load("https://x/a.glb");
        let new = viewer.begin_load("https://x/b.glb");
        assert!(!viewer.finish_load(old, Ok(triangle())));
        assert!(matches!(viewer.state(), ViewerState::Loading { url } if url.ends_with("b.glb")));
        assert!(viewer.finish_load(new, Ok(triangle())));
    }

    #[test]
    fn clear_drops_model_and_pending_load() {
        let mut viewer = ModelViewer::default();
        let t = viewer.begin_load("https://x/a.glb");
        viewer.finish_load(t, Ok(triangle()));
        let pending = viewer.begin_load("https://x/b.glb");
        viewer.clear();
        assert_eq!(viewer.state(), &ViewerState::Empty);
        assert!(!viewer.finish_load(pending, Ok(triangle())));
        assert!(viewer.mesh().is_none());
    }
}
