//! Runs the controller's commands off the UI thread.
//!
//! Futures go to `spawn_local` on the web and to a tokio runtime natively.
//! Every completion is sent back through one unbounded channel that the app
//! drains at the top of each frame, followed by a repaint request so the
//! frame actually happens.

use std::future::Future;

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use rfd::AsyncFileDialog;

use crate::client::{TaskClient, TaskId, TaskSnapshot};
use crate::encoder::{self, ImageMime, UploadedImage};
use crate::error::{PollError, ReadError, SubmissionError};
use crate::poller::{Command, Ticket};
use crate::viewer::{LoadTicket, MeshData, load_glb};

#[derive(Debug)]
pub enum Event {
    Picked(Result<UploadedImage, ReadError>),
    Created { ticket: Ticket, result: Result<TaskId, SubmissionError> },
    Status { ticket: Ticket, result: Result<TaskSnapshot, PollError> },
    ModelLoaded { ticket: LoadTicket, result: Result<MeshData, String> },
}

#[derive(Clone)]
struct Notifier {
    tx: UnboundedSender<Event>,
    ctx: egui::Context,
}

impl Notifier {
    fn send(&self, event: Event) {
        // The receiver only goes away with the app itself.
        if self.tx.unbounded_send(event).is_ok() {
            self.ctx.request_repaint();
        }
    }
}

pub struct Runtime {
    notifier: Notifier,
    rx: UnboundedReceiver<Event>,
    #[cfg(not(target_arch = "wasm32"))]
    executor: tokio::runtime::Runtime,
}

impl Runtime {
    pub fn new(ctx: egui::Context) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        Ok(Self {
            notifier: Notifier { tx, ctx },
            rx,
            #[cfg(not(target_arch = "wasm32"))]
            executor: tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("photomesh-io")
                .enable_all()
                .build()?,
        })
    }

    /// Everything that completed since the last frame, in arrival order.
    #[allow(deprecated)]
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.rx.try_next() {
            events.push(event);
        }
        events
    }

    pub fn pick_image(&self) {
        let notifier = self.notifier.clone();
        let mut exts: Vec<&str> = ImageMime::ALL.iter().flat_map(|m| m.extensions()).copied().collect();
        // other image types can still be picked; the form rejects them inline
        exts.extend(["gif", "bmp", "tif", "tiff", "heic", "svg"]);
        self.execute(async move {
            if let Some(handle) = AsyncFileDialog::new().add_filter("Images", &exts).pick_file().await {
                notifier.send(Event::Picked(encoder::read_picked(handle).await));
            }
        });
    }

    pub fn dispatch(&self, client: &TaskClient, command: Command) {
        let notifier = self.notifier.clone();
        let client = client.clone();
        match command {
            Command::CreateTask { ticket, mime, bytes, options } => self.execute(async move {
                let data_uri = encoder::to_data_uri(mime, &bytes);
                let result = client.create_task(&data_uri, options).await;
                notifier.send(Event::Created { ticket, result });
            }),
            Command::PollStatus { ticket, task_id } => self.execute(async move {
                let result = client.get_task_status(&task_id).await;
                notifier.send(Event::Status { ticket, result });
            }),
        }
    }

    pub fn load_model(&self, client: &TaskClient, ticket: LoadTicket, url: String) {
        let notifier = self.notifier.clone();
        let client = client.clone();
        self.execute(async move {
            let result = match client.fetch_asset(&url).await {
                Ok(bytes) => load_glb(&bytes).map_err(|e| format!("{e:#}")),
                Err(e) => Err(e.to_string()),
            };
            notifier.send(Event::ModelLoaded { ticket, result });
        });
    }

    // Executes an async future without blocking the egui thread
    #[cfg(not(target_arch = "wasm32"))]
    fn execute<F: Future<Output = ()> + Send + 'static>(&self, f: F) {
        self.executor.spawn(f);
    }

    #[cfg(target_arch = "wasm32")]
    fn execute<F: Future<Output = ()> + 'static>(&self, f: F) {
        wasm_bindgen_futures::spawn_local(f);
    }
}
