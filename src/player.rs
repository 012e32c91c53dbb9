use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::{
  io::BufReader as TokioBufReader,
  io::{AsyncBufReadExt, AsyncWriteExt},
  net::UnixStream,
  process::{Child as TokioChild, Command},
  sync::{Mutex, mpsc},
  task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::item::ItemId;
use crate::session::{MediaSource, PlaybackEvent, PlaybackEventKind, PlaybackSession, PlayerStatus};

/// Observer id used for the `pause` property.
const PAUSE_OBSERVER: u64 = 1;

/// Attributes mpv events to queue items.
///
/// Every `loadfile` we send produces exactly one `start-file`, in order, so the item of a
/// source becomes current only when its own `start-file` is read. Events still buffered
/// for the previous file keep the previous item.
#[derive(Debug, Default)]
struct EventTagger {
  /// Items whose `loadfile` was sent but whose `start-file` has not been seen yet.
  pending: VecDeque<ItemId>,
  current: Option<ItemId>,
}

impl EventTagger {
  fn expect(&mut self, item: ItemId) {
    self.pending.push_back(item);
  }

  /// The `loadfile` for `item` was rejected, so no `start-file` will follow.
  fn forget(&mut self, item: ItemId) {
    if let Some(pos) = self.pending.iter().rposition(|i| *i == item) {
      self.pending.remove(pos);
    }
  }

  fn clear_current(&mut self) {
    self.current = None;
  }

  fn reset(&mut self) {
    *self = Self::default();
  }

  /// Translate one IPC line and tag it with the item it belongs to.
  fn tag(&mut self, value: &Value) -> Option<PlaybackEvent> {
    if value.get("event").and_then(Value::as_str) == Some("start-file")
      && let Some(next) = self.pending.pop_front()
    {
      self.current = Some(next);
    }
    let kind = translate_event(value)?;
    let item = self.current?;
    if matches!(kind, PlaybackEventKind::Finished) {
      self.current = None;
    }
    Some(PlaybackEvent { item, kind })
  }
}

fn lock(tagger: &StdMutex<EventTagger>) -> MutexGuard<'_, EventTagger> {
  tagger.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MpvProcess {
  child: TokioChild,
  socket_path: PathBuf,
  monitor: JoinHandle<()>,
}

/// One long-lived `mpv --idle` process driven over its JSON IPC socket.
///
/// Player events are tagged with the item whose file mpv was playing when it emitted them
/// and sent on the channel handed to [`MpvSession::new`].
pub struct MpvSession {
  video: bool,
  events: mpsc::UnboundedSender<PlaybackEvent>,
  tagger: Arc<StdMutex<EventTagger>>,
  process: Mutex<Option<MpvProcess>>,
  next_request: AtomicU64,
}

impl MpvSession {
  pub fn new(video: bool, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
    Self {
      video,
      events,
      tagger: Arc::new(StdMutex::new(EventTagger::default())),
      process: Mutex::new(None),
      next_request: AtomicU64::new(1),
    }
  }

  /// Start mpv if it is not running (or has exited) and return its IPC socket.
  async fn ensure_process(&self) -> Result<PathBuf> {
    let mut process = self.process.lock().await;
    if let Some(p) = process.as_mut() {
      match p.child.try_wait() {
        Ok(None) => return Ok(p.socket_path.clone()),
        _ => {
          warn!("mpv: process exited, restarting");
          p.monitor.abort();
          let _ = std::fs::remove_file(&p.socket_path);
          lock(&self.tagger).reset();
        }
      }
    }

    let socket_path = std::env::temp_dir().join(format!("ypq-mpv-{}.sock", std::process::id()));
    // Remove stale socket if it exists from a previous crash.
    let _ = std::fs::remove_file(&socket_path);
    let socket_str = socket_path.to_str().context("Temp dir path is not valid UTF-8")?.to_string();

    let mut cmd = Command::new("mpv");
    cmd.args(["--idle=yes", "--keep-open=no", "--no-terminal", &format!("--input-ipc-server={}", socket_str)]);
    if self.video {
      cmd.arg("--force-window=yes");
    } else {
      cmd.arg("--no-video");
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("mpv not found. Install it with: brew install mpv (macOS) or apt install mpv (Linux)")
      } else {
        anyhow!(e).context("Failed to spawn mpv process")
      }
    })?;
    info!(socket = %socket_str, "mpv: started");

    let stream = connect_with_retry(&socket_path, constants().mpv_ipc_timeout()).await?;
    let monitor = tokio::spawn(monitor_events(stream, Arc::clone(&self.tagger), self.events.clone()));
    *process = Some(MpvProcess { child, socket_path: socket_path.clone(), monitor });
    Ok(socket_path)
  }

  async fn socket_path(&self) -> Option<PathBuf> {
    self.process.lock().await.as_ref().map(|p| p.socket_path.clone())
  }

  /// Send one IPC command and wait for its reply. Returns the reply's `data`.
  async fn command(&self, socket_path: &Path, args: Value) -> Result<Value> {
    let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
    let mut stream = UnixStream::connect(socket_path).await.context("Failed to connect to mpv IPC socket")?;
    let mut line = json!({ "command": args, "request_id": request_id }).to_string();
    line.push('\n');
    stream.write_all(line.as_bytes()).await.context("Failed to send command to mpv IPC")?;

    let reader = TokioBufReader::new(stream);
    let mut lines = reader.lines();
    let timeout = constants().mpv_ipc_timeout();
    // mpv may emit event lines before our response; read up to 20 lines.
    for _ in 0..20 {
      let line = tokio::time::timeout(timeout, lines.next_line())
        .await
        .context("Timeout waiting for mpv IPC response")?
        .context("Failed to read from mpv IPC socket")?;
      let Some(line) = line else { break };
      if let Ok(val) = serde_json::from_str::<Value>(&line)
        && val.get("request_id").and_then(Value::as_u64) == Some(request_id)
      {
        return match val.get("error").and_then(Value::as_str) {
          Some("success") => Ok(val.get("data").cloned().unwrap_or(Value::Null)),
          Some(err) => Err(anyhow!("mpv rejected {}: {}", args, err)),
          None => Err(anyhow!("mpv reply without status for {}", args)),
        };
      }
    }
    bail!("mpv closed the IPC connection without answering {}", args)
  }

  async fn set_pause(&self, pause: bool) -> Result<()> {
    let Some(socket) = self.socket_path().await else { return Ok(()) };
    self.command(&socket, json!(["set_property", "pause", pause])).await?;
    Ok(())
  }
}

#[async_trait]
impl PlaybackSession for MpvSession {
  async fn set_source(&self, source: MediaSource) -> Result<()> {
    let socket = self.ensure_process().await?;
    debug!(item = %source.item, "mpv: loading source");
    self.command(&socket, json!(["set_property", "force-media-title", source.title])).await?;
    lock(&self.tagger).expect(source.item);
    if let Err(e) = self.command(&socket, json!(["loadfile", source.url, "replace"])).await {
      lock(&self.tagger).forget(source.item);
      return Err(e);
    }
    Ok(())
  }

  async fn play(&self) -> Result<()> {
    self.set_pause(false).await
  }

  async fn pause(&self) -> Result<()> {
    self.set_pause(true).await
  }

  async fn stop(&self) -> Result<()> {
    lock(&self.tagger).clear_current();
    let Some(socket) = self.socket_path().await else { return Ok(()) };
    self.command(&socket, json!(["stop"])).await?;
    Ok(())
  }

  async fn position(&self) -> Result<Option<Duration>> {
    let Some(socket) = self.socket_path().await else { return Ok(None) };
    // `time-pos` is unavailable while nothing is loaded.
    match self.command(&socket, json!(["get_property", "time-pos"])).await {
      Ok(value) => Ok(value.as_f64().filter(|s| s.is_finite() && *s >= 0.0).map(Duration::from_secs_f64)),
      Err(_) => Ok(None),
    }
  }
}

impl Drop for MpvSession {
  fn drop(&mut self) {
    if let Some(p) = self.process.get_mut().take() {
      p.monitor.abort();
      let _ = std::fs::remove_file(&p.socket_path);
      // `kill_on_drop` takes care of the child.
    }
  }
}

async fn connect_with_retry(path: &Path, timeout: Duration) -> Result<UnixStream> {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    match UnixStream::connect(path).await {
      Ok(stream) => return Ok(stream),
      Err(e) if tokio::time::Instant::now() >= deadline => {
        return Err(anyhow!(e).context("mpv IPC socket never came up"));
      }
      Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
    }
  }
}

/// Read mpv's event stream for the life of the process and forward what the engine cares
/// about, tagged with the item it belongs to.
async fn monitor_events(
  mut stream: UnixStream,
  tagger: Arc<StdMutex<EventTagger>>,
  events: mpsc::UnboundedSender<PlaybackEvent>,
) {
  let observe = format!("{}\n", json!({ "command": ["observe_property", PAUSE_OBSERVER, "pause"] }));
  if let Err(e) = stream.write_all(observe.as_bytes()).await {
    warn!(err = %e, "mpv: could not observe pause state");
  }

  let mut lines = TokioBufReader::new(stream).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    let Ok(value) = serde_json::from_str::<Value>(&line) else { continue };
    let Some(event) = lock(&tagger).tag(&value) else { continue };
    if events.send(event).is_err() {
      return;
    }
  }

  let current = lock(&tagger).current.take();
  if let Some(item) = current {
    warn!("mpv: IPC connection closed during playback");
    let kind = PlaybackEventKind::Status(PlayerStatus::Error("mpv exited".to_string()));
    let _ = events.send(PlaybackEvent { item, kind });
  }
}

/// Map one mpv IPC event to a player event.
fn translate_event(value: &Value) -> Option<PlaybackEventKind> {
  match value.get("event")?.as_str()? {
    "end-file" => match value.get("reason").and_then(Value::as_str) {
      Some("eof") => Some(PlaybackEventKind::Finished),
      Some("error") => {
        let reason = value.get("file_error").and_then(Value::as_str).unwrap_or("playback error");
        Some(PlaybackEventKind::Status(PlayerStatus::Error(reason.to_string())))
      }
      // "stop" and "redirect" come from our own loadfile/stop commands.
      _ => None,
    },
    "start-file" => Some(PlaybackEventKind::Status(PlayerStatus::Loading)),
    "file-loaded" => Some(PlaybackEventKind::Status(PlayerStatus::Playing)),
    "idle" => Some(PlaybackEventKind::Status(PlayerStatus::Stopped)),
    "property-change" if value.get("id").and_then(Value::as_u64) == Some(PAUSE_OBSERVER) => {
      match value.get("data").and_then(Value::as_bool)? {
        true => Some(PlaybackEventKind::Status(PlayerStatus::Paused)),
        false => Some(PlaybackEventKind::Status(PlayerStatus::Playing)),
      }
    }
    _ => None,
  }
}
