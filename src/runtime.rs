// Real-time drive control loop with fail-safe watchdog
//
// One worker task multiplexes the orientation stream and the UDP command
// channel with a 50 ms bounded poll. Motors are stopped whenever drive
// commands stop arriving, and every exit path issues a final motor stop
// before the task terminates.

use std::net::SocketAddr;

use nalgebra::UnitQuaternion;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{
    DRIVE_TIMEOUT, ENCODER_COUNTS_PER_ROTATION, LOOP_POLL_TIMEOUT, RuntimeConfig,
    WHEEL_DIAMETER_MM,
};
use crate::imu::{self, ImuError, Vmu931};
use crate::motor::{
    DRIVE_ADDRESSES, ENCODER_ADDRESS, MOTOR_ACCELERATION, MotorBus, RoboclawBus, RoboclawError,
};
use crate::net::{CommandTransport, Received, TransportError, UdpCommandServer};
use crate::odometry::{OdometryEstimator, timestamp_us};
use crate::pose::{Pose, PoseStore};
use crate::protocol::{DriveCommand, PoseReport};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("motor controller: {0}")]
    Motor(#[from] RoboclawError),

    #[error("imu: {0}")]
    Imu(#[from] ImuError),

    #[error("network: {0}")]
    Transport(#[from] TransportError),
}

/// Open every hardware interface and assemble the control loop.
///
/// Fails synchronously if any interface cannot be opened; interfaces opened
/// before the failing one are closed again on drop.
pub async fn connect(
    cfg: &RuntimeConfig,
) -> Result<ControlLoop<RoboclawBus, UdpCommandServer>, RuntimeError> {
    info!("opening motor controllers on {}", cfg.motor_port);
    let mut motors = RoboclawBus::open(&cfg.motor_port, cfg.motor_baudrate)?;
    for &address in &DRIVE_ADDRESSES {
        let tenths = motors.main_battery_voltage(address)?;
        info!(
            "controller {:#04x} battery voltage: {}.{} V",
            address,
            tenths / 10,
            tenths % 10
        );
    }

    info!("opening imu on {}", cfg.imu_port);
    let mut vmu = Vmu931::open(&cfg.imu_port)?;
    vmu.stream_quaternion()?;
    let orientation = imu::spawn_reader(vmu);

    let transport = UdpCommandServer::bind(cfg.listen_port, cfg.receive_timeout()).await?;

    let estimator = OdometryEstimator::new(WHEEL_DIAMETER_MM, ENCODER_COUNTS_PER_ROTATION);
    Ok(ControlLoop::new(
        motors,
        transport,
        orientation,
        estimator,
        cfg.report_to,
    ))
}

/// The drive control loop and everything it owns exclusively.
pub struct ControlLoop<M, T> {
    motors: M,
    transport: T,
    orientation: watch::Receiver<UnitQuaternion<f32>>,
    estimator: OdometryEstimator,
    pose: PoseStore,
    /// Last speed pair all controllers accepted; None until the first write.
    last_speed: Option<(i16, i16)>,
    /// Watchdog clock, reset by every recognized drive message.
    command_seen_at: Instant,
    report_to: Option<SocketAddr>,
}

impl<M, T> ControlLoop<M, T>
where
    M: MotorBus + Send + 'static,
    T: CommandTransport + Send + 'static,
{
    pub fn new(
        motors: M,
        transport: T,
        orientation: watch::Receiver<UnitQuaternion<f32>>,
        estimator: OdometryEstimator,
        report_to: Option<SocketAddr>,
    ) -> Self {
        Self {
            motors,
            transport,
            orientation,
            estimator,
            pose: PoseStore::new(),
            last_speed: None,
            command_seen_at: Instant::now(),
            report_to,
        }
    }

    /// Cloneable reader handle for the latest pose.
    pub fn pose_store(&self) -> PoseStore {
        self.pose.clone()
    }

    /// Spawn the single worker task running the loop body.
    pub fn start(self) -> ControlHandle {
        let pose = self.pose.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        info!(
            "control loop starting: {:?} poll, {:?} drive timeout",
            LOOP_POLL_TIMEOUT, DRIVE_TIMEOUT
        );
        let task = tokio::spawn(self.run(cancel_rx));
        ControlHandle {
            cancel: cancel_tx,
            task,
            pose,
        }
    }

    async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                // Sender dropped counts as cancellation too
                _ = cancel.changed() => break,

                changed = self.orientation.changed() => {
                    if changed.is_err() {
                        error!("orientation stream closed");
                        break;
                    }
                    if !self.on_orientation().await {
                        break;
                    }
                }

                readable = self.transport.readable() => {
                    if let Err(e) = readable {
                        error!("network wait failed: {e}");
                        break;
                    }
                    if !self.on_network().await {
                        break;
                    }
                }

                _ = time::sleep(LOOP_POLL_TIMEOUT) => {}
            }

            self.check_watchdog();
        }

        // No exit path may leave the motors running
        self.stop_motors();
        info!("control loop finished");
    }

    /// Fold the latest orientation sample and fresh encoder counts into the
    /// pose estimate. Returns false on fatal hardware failure.
    async fn on_orientation(&mut self) -> bool {
        let orientation = *self.orientation.borrow_and_update();

        let (left, right) = match self.motors.read_encoders(ENCODER_ADDRESS) {
            Ok(counts) => counts,
            Err(e) => {
                error!("encoder read failed: {e}");
                return false;
            }
        };

        let now = timestamp_us();
        self.estimator.update(left, right, orientation, now);
        self.pose.store(self.estimator.pose());

        if let Some(dest) = self.report_to {
            let q = orientation.coords;
            let report = PoseReport {
                timestamp_us: now,
                left,
                right,
                rotation_wxyz: [q.w, q.x, q.y, q.z],
            };
            if let Err(e) = self.transport.send_to(&report.encode(), dest).await {
                warn!("failed to publish odometry report: {e}");
            }
        }

        true
    }

    /// Receive and process one drive message. Returns false on fatal
    /// transport failure.
    async fn on_network(&mut self) -> bool {
        match self.transport.recv().await {
            Ok(Received::TimedOut) => {
                // Momentary silence on a ready socket; stop defensively
                warn!("receive timeout on drive channel");
                self.stop_motors();
                true
            }
            Ok(Received::Frame(frame)) => {
                self.on_drive_frame(&frame);
                true
            }
            Err(e) => {
                error!("network receive failed: {e}");
                false
            }
        }
    }

    fn on_drive_frame(&mut self, frame: &[u8]) {
        let command = match DriveCommand::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("ignoring drive packet: {e}");
                return;
            }
        };

        match command {
            DriveCommand::KeepAlive => {}
            DriveCommand::SetSpeed { left, right } => self.apply_speed(left, right),
            DriveCommand::PositionWithSpeed { .. } => {
                warn!("unsupported drive command, ignoring");
                return;
            }
        }

        self.command_seen_at = Instant::now();
    }

    /// Forward a speed pair to all drive controllers, skipping the write when
    /// it matches the last applied pair. A failing unit is logged and not
    /// retried; already-written units are not rolled back.
    fn apply_speed(&mut self, left: i16, right: i16) {
        if self.last_speed == Some((left, right)) {
            return;
        }

        debug!("drive speed: left={left} right={right}");
        let mut ok = true;
        for &address in &DRIVE_ADDRESSES {
            if let Err(e) = self
                .motors
                .set_speed(address, left, right, MOTOR_ACCELERATION)
            {
                warn!("controller {address:#04x} rejected speed command: {e}");
                ok = false;
            }
        }

        if ok {
            self.last_speed = Some((left, right));
        }
    }

    fn check_watchdog(&mut self) {
        if self.command_seen_at.elapsed() > DRIVE_TIMEOUT {
            warn!(
                "no drive command for {:?}, stopping motors",
                DRIVE_TIMEOUT
            );
            self.stop_motors();
            // One stop per timeout window, not per poll tick
            self.command_seen_at = Instant::now();
        }
    }

    fn stop_motors(&mut self) {
        for &address in &DRIVE_ADDRESSES {
            if let Err(e) = self.motors.stop(address) {
                warn!("unable to stop controller {address:#04x}: {e}");
            }
        }
    }
}

/// Handle to a running control loop.
pub struct ControlHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
    pose: PoseStore,
}

impl ControlHandle {
    /// Latest pose snapshot; callable from any thread at any time.
    pub fn pose(&self) -> Pose {
        self.pose.get()
    }

    pub fn pose_store(&self) -> PoseStore {
        self.pose.clone()
    }

    /// Signal cancellation and wait for the worker to fully exit.
    ///
    /// When this returns, the final motor stop has been issued and no
    /// further motor writes can occur.
    pub async fn stop(self) {
        info!("stopping control loop");
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            error!("control loop task failed: {e}");
        }
    }
}
