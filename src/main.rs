// ── Native entry‑point ──
#[cfg(not(target_arch = "wasm32"))]
fn main() -> eframe::Result<()> {
    use photomesh_ui::{PhotomeshApp, config::ServiceConfig};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Photomesh")
            .with_inner_size([1100.0, 720.0]),
        depth_buffer: 24,
        ..Default::default()
    };
    eframe::run_native(
        "Photomesh",
        options,
        Box::new(|cc| Ok(Box::new(PhotomeshApp::new(cc, ServiceConfig::from_env())?))),
    )
}

// The web build starts from `photomesh_ui::start`.
#[cfg(target_arch = "wasm32")]
fn main() {}
