use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::decision::{Decision, DecisionGroup, DecisionTable, Reason};
use super::forecast;
use super::power::{
    calculate_optimal_amperage, full_draw, power_needed, solar_available_power,
    DEFAULT_GRID_VOLTAGE,
};
use super::runtime::{DeviceRuntimeState, DeviceView};
use super::snapshot::{ControlSnapshot, ForecastSummary};
use crate::config::{ControlConfig, ControlConfigPatch, Settings};
use crate::domain::{ControlMode, Device, TariffMode};
use crate::gateway::SensorGateway;
use crate::publish::{device_topic, StatePublisher, STATE_TOPIC};
use crate::repo::{EnergyRecord, Repositories};

const SUN_UP: &str = "above_horizon";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How far back to search the sun history for the latest sunrise
    pub history_lookback: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            history_lookback: Duration::hours(24),
        }
    }
}

/// Everything measured at the start of a cycle.
#[derive(Debug, Clone)]
struct Readings {
    grid_power: f64,
    voltage: f64,
    tariff: TariffMode,
    daylight: bool,
    manual_override: Option<f64>,
    /// Present draw of each device (0 when off)
    device_power: HashMap<String, f64>,
}

impl Readings {
    fn power_of(&self, name: &str) -> f64 {
        self.device_power.get(name).copied().unwrap_or(0.0)
    }
}

/// The control loop's brain: owns per-device runtime state and turns readings into
/// switch and amperage commands.
///
/// One cycle at a time: the runtime map's mutex is held for the whole cycle, so the
/// periodic trigger and a manual trigger never interleave.
pub struct ControlEngine {
    gateway: Arc<dyn SensorGateway>,
    repos: Arc<Repositories>,
    publisher: Arc<dyn StatePublisher>,
    opts: EngineOptions,
    states: Mutex<HashMap<String, DeviceRuntimeState>>,
    views: RwLock<HashMap<String, DeviceView>>,
    snapshot: RwLock<Option<ControlSnapshot>>,
    manual_override: RwLock<Option<f64>>,
}

impl ControlEngine {
    pub fn new(
        gateway: Arc<dyn SensorGateway>,
        repos: Arc<Repositories>,
        publisher: Arc<dyn StatePublisher>,
        opts: EngineOptions,
    ) -> Self {
        Self {
            gateway,
            repos,
            publisher,
            opts,
            states: Mutex::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
            manual_override: RwLock::new(None),
        }
    }

    /// Runtime view of every device as of the last cycle (or manual switch).
    pub async fn get_device_states(&self) -> HashMap<String, DeviceView> {
        self.views.read().await.clone()
    }

    pub async fn get_debug_snapshot(&self) -> Option<ControlSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Replace the measured solar surplus with a fixed figure; `None` clears it.
    pub async fn set_manual_power_override(&self, watts: Option<f64>) {
        let watts = watts.filter(|w| w.is_finite());
        info!(override_w = ?watts, "manual power override set");
        *self.manual_override.write().await = watts;
    }

    pub async fn manual_power_override(&self) -> Option<f64> {
        *self.manual_override.read().await
    }

    pub async fn update_config(&self, patch: ControlConfigPatch) -> Result<ControlConfig> {
        let cfg = self
            .repos
            .update_control_config(patch)
            .await
            .context("saving control configuration")?;
        info!("control configuration updated");
        Ok(cfg)
    }

    /// One synchronous cycle, serialised with the periodic trigger.
    pub async fn run_cycle_now(&self) -> Result<ControlSnapshot> {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<ControlSnapshot> {
        let mut states = self.states.lock().await;

        let devices = self.repos.devices.load_all().await.context("loading devices")?;
        let cfg = self.repos.load_control_config().await.unwrap_or_else(|e| {
            warn!(error = %e, "control configuration unreadable, using defaults");
            ControlConfig::default()
        });
        let settings = self.repos.load_settings().await.unwrap_or_else(|e| {
            warn!(error = %e, "settings unreadable, using defaults");
            Settings::default()
        });
        let battery = self.repos.load_battery().await.unwrap_or_else(|e| {
            warn!(error = %e, "battery record unreadable, ignoring");
            None
        });

        self.reconcile(&mut states, devices, now).await;
        let order = priority_order(&states);

        let readings = self.take_readings(&cfg, &states).await;
        self.account_energy(&mut states, &cfg, &readings, now).await;

        let mut table = DecisionTable::default();
        self.mandatory_pass(&mut states, &order, &readings, &mut table, now).await;

        let mode = ControlMode::select(readings.tariff, readings.daylight);
        let measured = readings.manual_override.unwrap_or_else(|| {
            let controlled: f64 = readings.device_power.values().sum();
            solar_available_power(readings.grid_power, controlled, cfg.site_export_limit)
        });
        let available_power = match mode {
            ControlMode::Free => {
                free_pass(&states, &order, &readings, &mut table);
                f64::INFINITY
            }
            ControlMode::Solar => {
                solar_pass(&states, &order, &readings, measured, &mut table);
                measured
            }
            ControlMode::Tariff => {
                tariff_pass(&states, &order, &readings, &mut table);
                measured
            }
        };
        debug!(
            mode = %mode,
            tariff = %readings.tariff,
            available_w = available_power,
            "decisions computed"
        );

        self.apply(&mut states, &order, &table, settings.power_optimization_enabled, now)
            .await;
        self.persist_energy(&mut states).await;

        let forecast = if battery.is_some() || cfg.solar_forecast.is_some() {
            forecast::summarize(self.gateway.as_ref(), &cfg, battery.as_ref(), now).await
        } else {
            ForecastSummary::default()
        };

        let snapshot = ControlSnapshot {
            timestamp: now,
            mode,
            tariff_mode: readings.tariff,
            available_power,
            grid_voltage: readings.voltage,
            grid_power: readings.grid_power,
            power_optimization_enabled: settings.power_optimization_enabled,
            manual_power_override: readings.manual_override,
            mandatory_devices: table.rationale(DecisionGroup::Mandatory),
            optional_devices: table.rationale(DecisionGroup::Optional),
            forecast,
        };

        let views: HashMap<String, DeviceView> = states
            .iter()
            .map(|(name, st)| (name.clone(), st.view()))
            .collect();
        *self.views.write().await = views.clone();
        *self.snapshot.write().await = Some(snapshot.clone());
        drop(states);

        self.publish(&snapshot, &views).await;
        info!(
            mode = %snapshot.mode,
            grid_power_w = snapshot.grid_power,
            available_w = snapshot.available_power,
            devices_on = views.values().filter(|v| v.is_on).count(),
            "control cycle complete"
        );
        Ok(snapshot)
    }

    /// Switch a device by hand. Runtime state follows only on success.
    pub async fn set_device_power(&self, name: &str, on: bool) -> Result<bool> {
        let device = self
            .repos
            .devices
            .get(name)
            .await
            .context("loading device")?
            .with_context(|| format!("device {name} not found"))?;

        let ok = switch(self.gateway.as_ref(), &device, on).await;
        if ok {
            let now = Utc::now();
            let mut states = self.states.lock().await;
            let st = states
                .entry(device.name.clone())
                .or_insert_with(|| DeviceRuntimeState::new(device.clone(), now));
            st.mark_switched(on, now);
            self.views.write().await.insert(device.name.clone(), st.view());
        }
        Ok(ok)
    }

    async fn reconcile(
        &self,
        states: &mut HashMap<String, DeviceRuntimeState>,
        devices: Vec<Device>,
        now: DateTime<Utc>,
    ) {
        let names: Vec<String> = devices.iter().map(|d| d.name.clone()).collect();
        states.retain(|name, _| names.contains(name));

        for device in devices {
            let live = match self.gateway.read_is_on(&device.switch_entity).await {
                Ok(on) => on,
                Err(e) => {
                    warn!(
                        device = %device.name,
                        entity = %device.switch_entity,
                        error = %e,
                        "switch state unavailable, assuming off"
                    );
                    false
                }
            };
            let st = states
                .entry(device.name.clone())
                .or_insert_with(|| DeviceRuntimeState::new(device.clone(), now));
            st.device = device;
            if st.is_on != live {
                info!(
                    device = %st.device.name,
                    was_on = st.is_on,
                    now_on = live,
                    "switch state changed outside the controller"
                );
                st.mark_switched(live, now);
            }
        }
    }

    async fn take_readings(
        &self,
        cfg: &ControlConfig,
        states: &HashMap<String, DeviceRuntimeState>,
    ) -> Readings {
        let voltage = self.grid_voltage(cfg).await;
        let mut device_power = HashMap::with_capacity(states.len());
        for (name, st) in states {
            device_power.insert(name.clone(), self.device_power(st, voltage).await);
        }
        Readings {
            grid_power: self.grid_power(cfg).await,
            voltage,
            tariff: self.tariff_mode(cfg).await,
            daylight: self.is_daylight(cfg).await,
            manual_override: *self.manual_override.read().await,
            device_power,
        }
    }

    async fn grid_voltage(&self, cfg: &ControlConfig) -> f64 {
        if let Some(fixed) = cfg.grid_voltage_fixed.filter(|v| *v > 0.0) {
            return fixed;
        }
        let Some(entity) = cfg.grid_voltage.as_deref() else {
            return DEFAULT_GRID_VOLTAGE;
        };
        match self.gateway.read_number(entity).await {
            Ok(v) if v > 0.0 => v,
            Ok(v) => {
                warn!(entity, voltage = v, "implausible grid voltage, using default");
                DEFAULT_GRID_VOLTAGE
            }
            Err(e) => {
                warn!(entity, error = %e, "grid voltage unavailable, using default");
                DEFAULT_GRID_VOLTAGE
            }
        }
    }

    async fn grid_power(&self, cfg: &ControlConfig) -> f64 {
        let Some(entity) = cfg.grid_power.as_deref() else {
            debug!("no grid power sensor configured");
            return 0.0;
        };
        self.gateway.read_power_w(entity).await.unwrap_or_else(|e| {
            warn!(entity, error = %e, "grid power unavailable, assuming 0 W");
            0.0
        })
    }

    async fn tariff_mode(&self, cfg: &ControlConfig) -> TariffMode {
        let Some(entity) = cfg.tariff_rate.as_deref() else {
            return TariffMode::Normal;
        };
        match self.gateway.read_state(entity).await {
            Ok(state) => cfg.tariff_mode_for(&state.value),
            Err(e) => {
                warn!(entity, error = %e, "tariff rate unavailable, assuming normal");
                TariffMode::Normal
            }
        }
    }

    async fn is_daylight(&self, cfg: &ControlConfig) -> bool {
        match self.gateway.read_state(&cfg.sun_entity).await {
            Ok(sun) => sun.value == SUN_UP,
            Err(e) => {
                warn!(
                    entity = %cfg.sun_entity,
                    error = %e,
                    "sun state unavailable, assuming night"
                );
                false
            }
        }
    }

    /// Live sensor, then amperage x voltage, then the nominal draw.
    async fn device_power(&self, st: &DeviceRuntimeState, voltage: f64) -> f64 {
        if !st.is_on {
            return 0.0;
        }
        let device = &st.device;
        if let Some(sensor) = device.current_power_sensor.as_deref() {
            match self.gateway.read_power_w(sensor).await {
                Ok(w) => return w,
                Err(e) => warn!(
                    device = %device.name,
                    entity = sensor,
                    error = %e,
                    "power sensor unavailable"
                ),
            }
        }
        match st.current_amperage {
            Some(amps) if device.has_variable_amperage => amps * voltage,
            _ => device.typical_power_draw,
        }
    }

    async fn latest_sunrise(
        &self,
        cfg: &ControlConfig,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let since = now - self.opts.history_lookback;
        match self.gateway.read_history(&cfg.sun_entity, since).await {
            Ok(points) => points.iter().rev().find(|p| p.value == SUN_UP).map(|p| p.timestamp),
            Err(e) => {
                warn!(
                    entity = %cfg.sun_entity,
                    error = %e,
                    "sun history unavailable, skipping dawn reset"
                );
                None
            }
        }
    }

    async fn account_energy(
        &self,
        states: &mut HashMap<String, DeviceRuntimeState>,
        cfg: &ControlConfig,
        readings: &Readings,
        now: DateTime<Utc>,
    ) {
        let sunrise = self.latest_sunrise(cfg, now).await;
        for (name, st) in states.iter_mut() {
            if let Some(sunrise) = sunrise {
                if st.energy.reset_on_dawn(sunrise) {
                    debug!(device = %name, "daily energy reset at dawn");
                }
            }
            st.energy.accumulate(readings.power_of(name), now);
        }
    }

    /// Completion and dwell-time constraints. Runs in every mode.
    async fn mandatory_pass(
        &self,
        states: &mut HashMap<String, DeviceRuntimeState>,
        order: &[String],
        readings: &Readings,
        table: &mut DecisionTable,
        now: DateTime<Utc>,
    ) {
        for name in order {
            let Some(st) = states.get_mut(name) else { continue };

            if st.device.run_once && st.is_on && !st.has_completed {
                if let Some(sensor) = st.device.completion_sensor.as_deref() {
                    match self.gateway.read_is_on(sensor).await {
                        Ok(true) => {
                            info!(device = %name, "run-once task completed");
                            st.has_completed = true;
                        }
                        Ok(false) => {}
                        Err(e) => warn!(
                            device = %name,
                            entity = sensor,
                            error = %e,
                            "completion sensor unavailable"
                        ),
                    }
                }
            }

            if st.has_completed {
                table.set(Decision::off(name, Reason::TaskCompleted, DecisionGroup::Mandatory));
            } else if st.min_on_time_pending(now) {
                table.set(Decision::on(
                    name,
                    st.current_amperage,
                    readings.power_of(name),
                    Reason::MinOnTime,
                    DecisionGroup::Mandatory,
                ));
            } else if st.min_off_time_pending(now) {
                table.set(Decision::off(name, Reason::MinOffTime, DecisionGroup::Mandatory));
            }
        }
    }

    async fn apply(
        &self,
        states: &mut HashMap<String, DeviceRuntimeState>,
        order: &[String],
        table: &DecisionTable,
        optimization_enabled: bool,
        now: DateTime<Utc>,
    ) {
        // switch-offs first so freed power is not double-booked downstream
        for name in order {
            let (Some(st), Some(decision)) = (states.get_mut(name), table.get(name)) else {
                continue;
            };
            if decision.desired_on || !st.is_on {
                continue;
            }
            let forced = decision.reason == Reason::TaskCompleted;
            if !optimization_enabled && !forced {
                continue;
            }
            if switch(self.gateway.as_ref(), &st.device, false).await {
                st.mark_switched(false, now);
            }
        }

        if !optimization_enabled {
            debug!("power optimization disabled, leaving devices as they are");
            return;
        }

        for name in order {
            let (Some(st), Some(decision)) = (states.get_mut(name), table.get(name)) else {
                continue;
            };
            if !decision.desired_on {
                continue;
            }
            if !st.is_on {
                if !switch(self.gateway.as_ref(), &st.device, true).await {
                    continue;
                }
                st.mark_switched(true, now);
            }
            if let Some(amps) = decision.desired_amperage {
                if st.current_amperage != Some(amps)
                    && set_amperage(self.gateway.as_ref(), &st.device, amps).await
                {
                    st.current_amperage = Some(amps);
                }
            }
        }
    }

    /// Write changed daily counters back onto the device records so a restart resumes them.
    async fn persist_energy(&self, states: &mut HashMap<String, DeviceRuntimeState>) {
        let records: Vec<EnergyRecord> = states
            .values()
            .filter(|st| st.energy_unsaved())
            .map(|st| EnergyRecord {
                name: st.device.name.clone(),
                energy_delivered_today: st.energy.delivered_wh,
                last_power_update: st.energy.last_update,
                last_dawn_reset: st.energy.last_dawn_reset,
            })
            .collect();
        if records.is_empty() {
            return;
        }
        if let Err(e) = self.repos.devices.record_energy(&records).await {
            warn!(error = %e, "daily energy not saved, retrying next cycle");
            return;
        }
        for st in states.values_mut() {
            st.device.energy_delivered_today = st.energy.delivered_wh;
            st.device.last_power_update = st.energy.last_update;
            st.device.last_dawn_reset = st.energy.last_dawn_reset;
        }
    }

    async fn publish(&self, snapshot: &ControlSnapshot, views: &HashMap<String, DeviceView>) {
        match serde_json::to_value(snapshot) {
            Ok(v) => self.publisher.publish(STATE_TOPIC, &v).await,
            Err(e) => warn!(error = %e, "snapshot not serializable"),
        }
        for (name, view) in views {
            match serde_json::to_value(view) {
                Ok(v) => self.publisher.publish(&device_topic(name), &v).await,
                Err(e) => warn!(device = %name, error = %e, "device view not serializable"),
            }
        }
    }
}

/// Device names by ascending `order`; ties keep name order so cycles are repeatable.
fn priority_order(states: &HashMap<String, DeviceRuntimeState>) -> Vec<String> {
    let mut entries: Vec<(&String, i64)> =
        states.iter().map(|(n, s)| (n, s.device.order)).collect();
    entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(n, _)| n.clone()).collect()
}

/// Run locked-on devices flat out while the tariff allows it.
fn remaximize_locked(
    states: &HashMap<String, DeviceRuntimeState>,
    readings: &Readings,
    table: &mut DecisionTable,
) {
    for name in table.locked_on() {
        let Some(st) = states.get(&name) else { continue };
        let Some((_, max)) = st.device.amperage_bounds() else { continue };
        let power = power_needed(
            &st.device,
            st.is_on,
            readings.power_of(&name),
            st.current_amperage,
            Some(max),
            readings.voltage,
        );
        if let Some(d) = table.get_mut(&name) {
            d.desired_amperage = Some(max);
            d.power_w = power;
            d.reason = Reason::MinOnTimeFullDraw;
        }
    }
}

/// Fit a locked variable-amperage device into `available`.
fn reoptimize_locked(
    states: &HashMap<String, DeviceRuntimeState>,
    name: &str,
    available: f64,
    readings: &Readings,
    table: &mut DecisionTable,
) {
    let Some(st) = states.get(name) else { return };
    let Some(amps) = calculate_optimal_amperage(&st.device, available, readings.voltage) else {
        return;
    };
    let power = power_needed(
        &st.device,
        st.is_on,
        readings.power_of(name),
        st.current_amperage,
        Some(amps),
        readings.voltage,
    );
    if let Some(d) = table.get_mut(name) {
        d.desired_amperage = Some(amps);
        d.power_w = power;
        d.reason = Reason::MinOnTimeReoptimized;
    }
}

fn free_pass(
    states: &HashMap<String, DeviceRuntimeState>,
    order: &[String],
    readings: &Readings,
    table: &mut DecisionTable,
) {
    remaximize_locked(states, readings, table);
    for name in order {
        if table.contains(name) {
            continue;
        }
        let Some(st) = states.get(name) else { continue };
        let (amps, power) = full_draw(&st.device, readings.voltage);
        table.set(Decision::on(name, amps, power, Reason::FreeTariff, DecisionGroup::Optional));
    }
}

fn solar_pass(
    states: &HashMap<String, DeviceRuntimeState>,
    order: &[String],
    readings: &Readings,
    measured: f64,
    table: &mut DecisionTable,
) {
    let mut available = measured;
    let full_draw_allowed = readings.tariff.allows_full_draw();
    if full_draw_allowed {
        remaximize_locked(states, readings, table);
    }

    // locked devices are sized one after another so each sees only what is left
    let locked = table.locked_on();
    for name in order.iter().filter(|n| locked.contains(*n)) {
        if !full_draw_allowed {
            reoptimize_locked(states, name, available.max(0.0), readings, table);
        }
        if let Some(d) = table.get(name) {
            available -= d.power_w;
        }
    }
    available = available.max(0.0);

    for name in order {
        if table.contains(name) {
            continue;
        }
        let Some(st) = states.get(name) else { continue };
        let amps = calculate_optimal_amperage(&st.device, available, readings.voltage);
        let needed = power_needed(
            &st.device,
            st.is_on,
            readings.power_of(name),
            st.current_amperage,
            amps,
            readings.voltage,
        );
        if needed <= available {
            let reason = if st.is_on { Reason::AlreadyOn } else { Reason::TurnedOn };
            table.set(Decision::on(name, amps, needed, reason, DecisionGroup::Optional));
            available -= needed;
        } else {
            table.set(Decision::off(name, Reason::NotEnoughPower, DecisionGroup::Optional));
        }
    }
}

fn tariff_pass(
    states: &HashMap<String, DeviceRuntimeState>,
    order: &[String],
    readings: &Readings,
    table: &mut DecisionTable,
) {
    let cheap = readings.tariff.allows_full_draw();
    if cheap {
        remaximize_locked(states, readings, table);
    }
    for name in order {
        if table.contains(name) {
            continue;
        }
        let Some(st) = states.get(name) else { continue };
        let decision = match st.device.min_daily_power {
            None => Decision::off(name, Reason::NoDailyMinimum, DecisionGroup::Optional),
            Some(_) if !cheap => {
                Decision::off(name, Reason::TariffNotCheap, DecisionGroup::Optional)
            }
            Some(floor) if st.energy.delivered_wh >= floor => {
                Decision::off(name, Reason::DailyMinimumReached, DecisionGroup::Optional)
            }
            Some(_) => {
                let (amps, power) = full_draw(&st.device, readings.voltage);
                Decision::on(name, amps, power, Reason::BelowDailyMinimum, DecisionGroup::Optional)
            }
        };
        table.set(decision);
    }
}

/// `<domain>.turn_on|turn_off` on the device's switch entity.
async fn switch(gateway: &dyn SensorGateway, device: &Device, on: bool) -> bool {
    let action = if on { "turn_on" } else { "turn_off" };
    let ok = gateway
        .call_service(device.switch_domain(), action, &device.switch_entity, Map::new())
        .await;
    if ok {
        info!(device = %device.name, action, "device switched");
    } else {
        warn!(device = %device.name, action, "switch command failed, retrying next cycle");
    }
    ok
}

/// Set the charge current. Without a control entity the value is only tracked.
async fn set_amperage(gateway: &dyn SensorGateway, device: &Device, amps: f64) -> bool {
    let Some(entity) = device.variable_amperage_control.as_deref() else {
        debug!(device = %device.name, amps, "no amperage control entity, tracking only");
        return true;
    };
    let mut params = Map::new();
    params.insert("value".into(), Value::from(amps));
    let ok = gateway.call_service("number", "set_value", entity, params).await;
    if ok {
        info!(device = %device.name, amps, "amperage set");
    } else {
        warn!(device = %device.name, amps, "amperage command failed, retrying next cycle");
    }
    ok
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::gateway::{EntityState, SimulatedGateway};
    use crate::publish::RecordingPublisher;
    use chrono::TimeZone;

    struct Fixture {
        _dir: tempfile::TempDir,
        gw: SimulatedGateway,
        publisher: Arc<RecordingPublisher>,
        engine: ControlEngine,
    }

    async fn fixture(cfg: ControlConfig, devices: Vec<Device>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repos = Arc::new(Repositories::in_dir(dir.path()));
        repos.control.save(&cfg).await.unwrap();
        repos.devices.save_all(&devices).await.unwrap();

        let gw = SimulatedGateway::new();
        for d in &devices {
            gw.set_state(&d.switch_entity, "off").await;
        }
        let publisher = Arc::new(RecordingPublisher::new());
        let engine = ControlEngine::new(
            Arc::new(gw.clone()),
            repos,
            publisher.clone(),
            EngineOptions::default(),
        );
        Fixture {
            _dir: dir,
            gw,
            publisher,
            engine,
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn solar_cfg() -> ControlConfig {
        ControlConfig {
            grid_power: Some("sensor.grid".into()),
            ..Default::default()
        }
    }

    fn quick(name: &str, draw: f64, order: i64) -> Device {
        let mut d = Device::new(name, format!("switch.{}", name.to_lowercase()), draw);
        d.min_on_time = 0;
        d.min_off_time = 0;
        d.order = order;
        d
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut states = HashMap::new();
        for (name, order) in [("b", 1), ("a", 1), ("c", 0)] {
            states.insert(
                name.to_string(),
                DeviceRuntimeState::new(quick(name, 1.0, order), noon()),
            );
        }
        assert_eq!(priority_order(&states), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_solar_allocation_by_priority() {
        let f = fixture(
            solar_cfg(),
            vec![quick("Pool", 800.0, 1), quick("Boiler", 2000.0, 0), quick("Heater", 1500.0, 2)],
        )
        .await;
        f.gw.set_state("sun.sun", "above_horizon").await;
        f.gw.set_state("sensor.grid", "-2500").await;

        let snap = f.engine.run_cycle_at(noon()).await.unwrap();
        assert_eq!(snap.mode, ControlMode::Solar);
        assert_eq!(snap.available_power, 2500.0);

        let states = f.engine.get_device_states().await;
        assert!(states["Boiler"].is_on);
        assert!(!states["Pool"].is_on);
        assert!(!states["Heater"].is_on);
        let pool = snap.optional_devices.iter().find(|d| d.name == "Pool").unwrap();
        assert_eq!(pool.reason, "Not enough power available");
        assert!(f.publisher.last_on(STATE_TOPIC).await.is_some());
        assert!(f.publisher.last_on("devices/boiler/state").await.is_some());
    }

    #[tokio::test]
    async fn test_importing_means_no_surplus() {
        let f = fixture(solar_cfg(), vec![quick("Boiler", 500.0, 0)]).await;
        f.gw.set_state("sun.sun", "above_horizon").await;
        f.gw.set_state("sensor.grid", "500").await;

        let snap = f.engine.run_cycle_at(noon()).await.unwrap();
        assert_eq!(snap.available_power, 0.0);
        assert!(!f.engine.get_device_states().await["Boiler"].is_on);
    }

    #[tokio::test]
    async fn test_manual_override_replaces_measurement() {
        let f = fixture(solar_cfg(), vec![quick("Boiler", 1000.0, 0)]).await;
        f.gw.set_state("sun.sun", "above_horizon").await;
        f.gw.set_state("sensor.grid", "300").await;
        f.engine.set_manual_power_override(Some(1200.0)).await;

        let snap = f.engine.run_cycle_at(noon()).await.unwrap();
        assert_eq!(snap.available_power, 1200.0);
        assert_eq!(snap.manual_power_override, Some(1200.0));
        assert!(f.engine.get_device_states().await["Boiler"].is_on);
    }

    #[tokio::test]
    async fn test_variable_device_gets_optimal_amperage() {
        let mut ev = quick("EV", 7400.0, 0);
        ev.has_variable_amperage = true;
        ev.min_amperage = Some(6.0);
        ev.max_amperage = Some(32.0);
        ev.variable_amperage_control = Some("number.ev_amps".into());
        let f = fixture(solar_cfg(), vec![ev]).await;
        f.gw.set_state("sun.sun", "above_horizon").await;
        f.gw.set_state("sensor.grid", "-2990").await;

        f.engine.run_cycle_at(noon()).await.unwrap();
        let ev = &f.engine.get_device_states().await["EV"];
        assert!(ev.is_on);
        assert_eq!(ev.current_amperage, Some(13.0));
        assert_eq!(f.gw.read_number("number.ev_amps").await.unwrap(), 13.0);
    }

    #[tokio::test]
    async fn test_free_tariff_runs_everything_flat_out() {
        let mut ev = quick("EV", 7400.0, 1);
        ev.has_variable_amperage = true;
        ev.min_amperage = Some(6.0);
        ev.max_amperage = Some(16.0);
        let mut cfg = solar_cfg();
        cfg.tariff_rate = Some("sensor.tariff".into());
        cfg.tariff_modes.insert("free".into(), TariffMode::Free);
        let f = fixture(cfg, vec![quick("Boiler", 2000.0, 0), ev]).await;
        f.gw.set_state("sun.sun", "below_horizon").await;
        f.gw.set_state("sensor.grid", "3000").await;
        f.gw.set_state("sensor.tariff", "free").await;

        let snap = f.engine.run_cycle_at(noon()).await.unwrap();
        assert_eq!(snap.mode, ControlMode::Free);
        assert!(snap.available_power.is_infinite());
        let states = f.engine.get_device_states().await;
        assert!(states["Boiler"].is_on);
        assert!(states["EV"].is_on);
        assert_eq!(states["EV"].current_amperage, Some(16.0));
    }

    #[tokio::test]
    async fn test_unreachable_platform_degrades_to_fallbacks() {
        let f = fixture(solar_cfg(), vec![quick("Boiler", 2000.0, 0)]).await;
        f.gw.make_unreachable("sensor.grid").await;
        f.gw.make_unreachable("sun.sun").await;

        let snap = f.engine.run_cycle_at(noon()).await.unwrap();
        assert_eq!(snap.grid_power, 0.0);
        assert_eq!(snap.grid_voltage, DEFAULT_GRID_VOLTAGE);
        assert_eq!(snap.mode, ControlMode::Tariff);
        assert_eq!(snap.tariff_mode, TariffMode::Normal);
        assert!(!f.engine.get_device_states().await["Boiler"].is_on);
    }

    #[tokio::test]
    async fn test_voltage_sources() {
        let mut cfg = solar_cfg();
        cfg.grid_voltage = Some("sensor.voltage".into());
        let f = fixture(cfg, vec![]).await;
        f.gw.set_entity(EntityState::new("sensor.voltage", "241.5")).await;
        assert_eq!(f.engine.run_cycle_at(noon()).await.unwrap().grid_voltage, 241.5);

        f.engine
            .update_config(
                serde_json::from_value(serde_json::json!({"grid_voltage_fixed": 220.0})).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(f.engine.run_cycle_at(noon()).await.unwrap().grid_voltage, 220.0);
    }
}
