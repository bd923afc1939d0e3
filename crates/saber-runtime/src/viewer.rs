//! Viewer pipeline: relay frames in, smoothed pose and blade hits out.
//!
//! Two drivers share one [`PoseReconstructor`]:
//!
//! * the **network driver** applies every payload received from the
//!   [`ConnectionSession`](saber_client::ConnectionSession) inbound channel;
//! * the **tick driver** samples the current orientation at a fixed rate and
//!   runs [`CollisionDetector::tick`] against it.
//!
//! Both run in the same task under `tokio::select!`, so a tick never sees a
//! half-applied frame.  The pose also sits behind an [`RwLock`] so status
//! reporters on other tasks can read it.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use saber_perception::{ColliderId, CollisionDetector, PoseReconstructor, Quaternion};
use saber_types::SaberError;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Default collision tick rate, matching a 60 Hz render loop.
pub const DEFAULT_TICK_HZ: u32 = 60;

/// Pose shared between the viewer drivers and any observers.
#[derive(Debug, Clone, Default)]
pub struct SharedPose(Arc<RwLock<PoseReconstructor>>);

impl SharedPose {
    pub fn new(reconstructor: PoseReconstructor) -> Self {
        Self(Arc::new(RwLock::new(reconstructor)))
    }

    /// Decode and blend one relay payload.
    pub fn apply_bytes(&self, payload: &[u8]) -> Result<Quaternion, SaberError> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_bytes(payload)
    }

    /// Current smoothed orientation.
    pub fn current(&self) -> Quaternion {
        self.0.read().unwrap_or_else(PoisonError::into_inner).current()
    }

    /// Copy of the full reconstructor state.
    pub fn snapshot(&self) -> PoseReconstructor {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// A collider hidden by the blade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub collider: ColliderId,
    pub object: String,
}

/// Owns the collision scene and drives it from relay frames.
pub struct Viewer {
    pose: SharedPose,
    detector: CollisionDetector,
    tick_period: Duration,
    hits: Option<mpsc::UnboundedSender<Hit>>,
}

impl Viewer {
    /// `tick_hz` of zero falls back to [`DEFAULT_TICK_HZ`].
    pub fn new(detector: CollisionDetector, tick_hz: u32) -> Self {
        let hz = if tick_hz == 0 { DEFAULT_TICK_HZ } else { tick_hz };
        Self {
            pose: SharedPose::default(),
            detector,
            tick_period: Duration::from_secs_f64(1.0 / f64::from(hz)),
            hits: None,
        }
    }

    /// Report every hit on `tx`.
    pub fn with_hit_reporter(mut self, tx: mpsc::UnboundedSender<Hit>) -> Self {
        self.hits = Some(tx);
        self
    }

    pub fn pose(&self) -> SharedPose {
        self.pose.clone()
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// Run both drivers until `frames` closes, then hand back the scene.
    pub async fn run(mut self, mut frames: mpsc::Receiver<Bytes>) -> CollisionDetector {
        let mut ticker = time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            colliders = self.detector.colliders().len(),
            tick_ms = self.tick_period.as_millis() as u64,
            "viewer started"
        );

        loop {
            tokio::select! {
                payload = frames.recv() => match payload {
                    Some(payload) => {
                        // Malformed frames are already logged by the
                        // reconstructor and leave the pose untouched.
                        let _ = self.pose.apply_bytes(&payload);
                    }
                    None => break,
                },
                _ = ticker.tick() => self.tick(),
            }
        }

        let pose = self.pose.snapshot();
        info!(
            frames = pose.frames_applied(),
            rejected = pose.frames_rejected(),
            visible = self.detector.visible_count(),
            "viewer stopped"
        );
        self.detector
    }

    fn tick(&mut self) {
        let orientation = self.pose.current();
        for id in self.detector.tick(orientation) {
            let object = self
                .detector
                .collider(id)
                .map(|c| c.object.clone())
                .unwrap_or_default();
            if let Some(tx) = &self.hits {
                if tx.send(Hit { collider: id, object }).is_err() {
                    debug!("hit reporter gone");
                    self.hits = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saber_perception::{BladeGeometry, SceneObject, Vec3, orientation_from_frame};
    use saber_types::TelemetryFrame;

    fn frame(alpha: f32, beta: f32, gamma: f32) -> Bytes {
        Bytes::copy_from_slice(&TelemetryFrame::new(alpha, beta, gamma).encode())
    }

    fn scene() -> CollisionDetector {
        let mut detector = CollisionDetector::new(BladeGeometry::default());
        // Off to the right of the hilt, out of reach of the upright blade.
        detector.register_collider(&SceneObject::cuboid(
            "right",
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.1, 0.1, 0.1),
        ));
        detector
    }

    #[test]
    fn zero_tick_rate_uses_default() {
        let viewer = Viewer::new(CollisionDetector::default(), 0);
        assert_eq!(
            viewer.tick_period(),
            Duration::from_secs_f64(1.0 / f64::from(DEFAULT_TICK_HZ))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn network_driver_updates_shared_pose() {
        let viewer = Viewer::new(CollisionDetector::default(), 60);
        let pose = viewer.pose();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(viewer.run(rx));

        tx.send(frame(10.0, 20.0, 5.0)).await.unwrap();
        tx.send(Bytes::from_static(b"short")).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let state = pose.snapshot();
        assert_eq!(state.frames_applied(), 1);
        assert_eq!(state.frames_rejected(), 1);
        let target = orientation_from_frame(&TelemetryFrame::new(10.0, 20.0, 5.0));
        assert_eq!(state.last_target(), Some(target));
        assert_ne!(pose.current(), Quaternion::identity());
    }

    #[tokio::test(start_paused = true)]
    async fn upright_blade_hits_nothing() {
        let viewer = Viewer::new(scene(), 60);
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(viewer.run(rx));

        time::sleep(Duration::from_millis(200)).await;
        drop(tx);
        let detector = task.await.unwrap();

        assert_eq!(detector.visible_count(), 1);
        assert!(detector.blade_bounds().is_some(), "ticks ran");
    }

    #[tokio::test(start_paused = true)]
    async fn tilting_blade_hides_collider_once() {
        let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
        let viewer = Viewer::new(scene(), 60).with_hit_reporter(hit_tx);
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(viewer.run(rx));

        // Roll the hilt so the blade points along +X.
        for _ in 0..40 {
            tx.send(frame(0.0, 0.0, -90.0)).await.unwrap();
            time::sleep(Duration::from_millis(5)).await;
        }
        time::sleep(Duration::from_millis(200)).await;
        drop(tx);
        let detector = task.await.unwrap();

        assert_eq!(detector.visible_count(), 0);
        let hit = hit_rx.recv().await.expect("one hit");
        assert_eq!(hit, Hit { collider: ColliderId(0), object: "right".into() });
        assert!(hit_rx.recv().await.is_none(), "hidden collider fires once");
    }

    // ── Full path through a live relay ──────────────────────────────────────

    mod through_relay {
        use super::*;
        use saber_client::{ConnectionSession, SessionConfig, SessionHandle, WsConnector};
        use saber_relay::{RelayConfig, RelayServer, TelemetryRelay};
        use saber_types::SessionState;

        async fn start_relay() -> (String, Arc<TelemetryRelay>) {
            let bound = RelayServer::new(RelayConfig::default().with_host("127.0.0.1").with_port(0).with_insecure())
                .bind()
                .await
                .unwrap();
            let url = format!("ws://{}", bound.local_addr());
            let relay = bound.relay();
            tokio::spawn(bound.serve());
            (url, relay)
        }

        fn open_session(url: &str) -> (SessionHandle, mpsc::Receiver<Bytes>) {
            let config = SessionConfig::default().with_reconnect_delay(Duration::from_millis(50));
            let (session, handle, frames) = ConnectionSession::new(WsConnector::new(url), config);
            tokio::spawn(session.run());
            (handle, frames)
        }

        async fn wait_for_sessions(relay: &TelemetryRelay, n: usize) {
            time::timeout(Duration::from_secs(5), async {
                while relay.registry().len() < n {
                    time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("sessions registered with relay");
        }

        fn reference() -> Quaternion {
            Quaternion::new(0.980786665, 0.093295563, 0.169078824, 0.027673216)
        }

        #[tokio::test]
        async fn sensor_frame_reaches_viewer_byte_exact() {
            let (url, relay) = start_relay().await;
            let (sensor, mut sensor_frames) = open_session(&url);
            let (viewer, mut viewer_frames) = open_session(&url);
            assert!(sensor.wait_for_state(SessionState::Connected).await);
            assert!(viewer.wait_for_state(SessionState::Connected).await);
            wait_for_sessions(&relay, 2).await;

            let sample = TelemetryFrame::new(10.0, 20.0, 5.0);
            assert!(sensor.send_frame(&sample));

            let received = time::timeout(Duration::from_secs(5), viewer_frames.recv())
                .await
                .expect("frame relayed")
                .expect("session alive");
            assert_eq!(received.as_ref(), &sample.encode()[..]);

            let mut pose = PoseReconstructor::new();
            pose.apply_bytes(&received).unwrap();
            let target = pose.last_target().unwrap();
            assert!(target.angle_to(reference()) < 1e-6, "{target:?}");

            // 0.8^n of the initial 22.5 degrees drops below 1e-3 rad after 27
            // frames; send a few more than that.
            for _ in 0..30 {
                assert!(sensor.send_frame(&sample));
                let received = time::timeout(Duration::from_secs(5), viewer_frames.recv())
                    .await
                    .expect("frame relayed")
                    .expect("session alive");
                pose.apply_bytes(&received).unwrap();
            }
            assert!(pose.current().angle_to(reference()) < 1e-3);

            // The sender never hears its own frames.
            assert!(sensor_frames.try_recv().is_err());
        }

        #[tokio::test]
        async fn viewer_pipeline_converges_on_relayed_pose() {
            let (url, relay) = start_relay().await;
            let (sensor, _sensor_frames) = open_session(&url);
            let (viewer_handle, viewer_frames) = open_session(&url);
            assert!(sensor.wait_for_state(SessionState::Connected).await);
            assert!(viewer_handle.wait_for_state(SessionState::Connected).await);
            wait_for_sessions(&relay, 2).await;

            let viewer = Viewer::new(CollisionDetector::default(), 120);
            let pose = viewer.pose();
            let task = tokio::spawn(viewer.run(viewer_frames));

            let sample = TelemetryFrame::new(10.0, 20.0, 5.0);
            for _ in 0..31 {
                assert!(sensor.send_frame(&sample));
                time::sleep(Duration::from_millis(2)).await;
            }
            time::timeout(Duration::from_secs(5), async {
                while pose.snapshot().frames_applied() < 31 {
                    time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("all frames applied");

            assert!(pose.current().angle_to(reference()) < 1e-3);
            task.abort();
        }
    }
}
