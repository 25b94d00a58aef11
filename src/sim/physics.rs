//! Physics - Fixed-step update of every car
//!
//! Cars are ranked by race distance each tick and updated one at a time,
//! leader first. Each car reads the car ranked directly ahead of it, which
//! has already been moved this tick, so the processing order is part of
//! the result.

use rand::Rng;

use crate::sim::car::{Car, Duel, PitState};
use crate::sim::config::{DrivingTuning, PitTuning, RaceConfig};
use crate::sim::error::{SimError, SimResult};
use crate::sim::geom::{approach, lerp};
use crate::sim::pit::PitFacility;
use crate::sim::splits::SplitTracker;
use crate::sim::track::{forward_gap, Track};

/// What other cars may see of a car during a tick
#[derive(Debug, Clone, Copy)]
pub struct CarView {
    pub index: usize,
    pub id: u32,
    pub s: f32,
    pub velocity: f32,
    pub lateral: f32,
    pub pit_state: PitState,
    pub duel_partner: Option<usize>,
}

impl CarView {
    /// Capture the visible state of `car` at roster `index`
    pub fn of(index: usize, car: &Car) -> Self {
        Self {
            index,
            id: car.id,
            s: car.s,
            velocity: car.velocity,
            lateral: car.lateral,
            pit_state: car.pit_state,
            duel_partner: car.duel.map(|d| d.partner),
        }
    }
}

/// Shared, read-only inputs for one tick
pub struct Stepper<'a> {
    pub track: &'a Track,
    pub config: &'a RaceConfig,
    /// Simulation clock at the start of the tick
    pub now_ms: f64,
    pub dt: f32,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Ids of cars that crossed start/finish
    pub crossings: Vec<u32>,
    /// Ids of cars whose update was rejected and rolled back
    pub failed: Vec<u32>,
}

/// Timing events produced by a single car update
#[derive(Debug, Clone, Copy, Default)]
struct CarTick {
    crossed_start: bool,
    half_lap_ms: Option<f64>,
}

/// Roster indices ordered leader first; ties go to the lower car id
pub fn ranking(cars: &[Car], track: &Track) -> Vec<usize> {
    let distances: Vec<f32> = cars
        .iter()
        .map(|c| c.race_distance(track.start_s(), track.total_length()))
        .collect();
    let mut order: Vec<usize> = (0..cars.len()).collect();
    order.sort_by(|&a, &b| {
        distances[b]
            .total_cmp(&distances[a])
            .then_with(|| cars[a].id.cmp(&cars[b].id))
    });
    order
}

/// Fraction of the tick at which a forward move crossed `line_s`, if it did
pub fn crossed_line(prev_s: f32, travelled: f32, line_s: f32, total: f32) -> Option<f32> {
    if !(travelled > 0.0) || travelled >= total {
        return None;
    }
    let to_line = forward_gap(prev_s, line_s, total);
    (to_line > 0.0 && to_line <= travelled).then(|| to_line / travelled)
}

/// Signed along-track offset of `to` relative to `from`, in (-L/2, L/2]
fn signed_gap(track: &Track, from: f32, to: f32) -> f32 {
    let gap = track.forward_gap(from, to);
    if gap > track.total_length() * 0.5 {
        gap - track.total_length()
    } else {
        gap
    }
}

/// Advance every car by one tick
pub fn step<R: Rng + ?Sized>(
    stepper: &Stepper<'_>,
    pit: &mut PitFacility,
    cars: &mut [Car],
    splits: &mut SplitTracker,
    rng: &mut R,
) -> StepReport {
    let track = stepper.track;
    let order = ranking(cars, track);
    let mut views: Vec<CarView> = cars
        .iter()
        .enumerate()
        .map(|(i, car)| CarView::of(i, car))
        .collect();
    let mut report = StepReport::default();
    let n = order.len();

    for (rank, &index) in order.iter().enumerate() {
        let ahead = (n > 1).then(|| views[order[(rank + n - 1) % n]]);
        let id = cars[index].id;
        let held = pit.held_by(id);

        let mut next = cars[index].clone();
        let result = update_car(&mut next, index, ahead, &views, stepper, pit, rng).and_then(
            |tick| {
                if next.is_finite() {
                    Ok(tick)
                } else {
                    Err(SimError::NonFiniteState { id })
                }
            },
        );

        match result {
            Ok(tick) => {
                cars[index] = next;
                views[index] = CarView::of(index, &cars[index]);
                if tick.crossed_start {
                    report.crossings.push(id);
                }
                if let Some(time_ms) = tick.half_lap_ms {
                    splits.record_crossing(id, time_ms);
                }
            }
            Err(err) => {
                if err.is_recoverable() {
                    log::warn!("car {} update rejected, keeping previous state: {}", id, err);
                } else {
                    log::error!("car {} update failed: {}", id, err);
                }
                pit.restore_holding(id, held);
                report.failed.push(id);
            }
        }
    }

    report
}

fn update_car<R: Rng + ?Sized>(
    car: &mut Car,
    index: usize,
    ahead: Option<CarView>,
    views: &[CarView],
    stepper: &Stepper<'_>,
    pit: &mut PitFacility,
    rng: &mut R,
) -> SimResult<CarTick> {
    let track = stepper.track;
    let config = stepper.config;
    let dt = stepper.dt;
    let prev_s = car.s;

    if car.pit_state != PitState::Servicing {
        drain_energy(car, track, &config.driving, dt);
    }
    arm_pit_request(car, &config.pit);

    match car.pit_state {
        PitState::None => {
            if car.want_pit && try_enter_pit(car, pit, track) {
                car.velocity = car.velocity.min(car.coefficients.pit_speed);
                integrate(car, track, dt);
            } else {
                drive(car, index, ahead, views, track, &config.driving, dt);
                integrate(car, track, dt);
            }
        }
        PitState::Entering => approach_stall(car, pit, track, &config.pit, dt, rng)?,
        PitState::Servicing => service(car, dt),
        PitState::Exiting => leave_pit(car, pit, track, &config.pit, &config.driving, dt),
    }

    let mut travelled = track.forward_gap(prev_s, car.s);
    if travelled > track.total_length() * 0.5 {
        // Snapping into a stall can nudge s backward; that is not progress
        travelled = 0.0;
    }
    let mut tick = CarTick::default();
    let total = track.total_length();
    let tick_ms = f64::from(dt) * 1000.0;

    if let Some(fraction) = crossed_line(prev_s, travelled, track.start_s(), total) {
        let time_ms = stepper.now_ms + f64::from(fraction) * tick_ms;
        complete_lap(car, time_ms, &config.pit, config.min_lap_ms, rng);
        tick.crossed_start = true;
    }
    if let Some(fraction) = crossed_line(prev_s, travelled, track.half_lap_s(), total) {
        tick.half_lap_ms = Some(stepper.now_ms + f64::from(fraction) * tick_ms);
    }

    Ok(tick)
}

fn drain_energy(car: &mut Car, track: &Track, driving: &DrivingTuning, dt: f32) {
    let c = &car.coefficients;
    let speed_ratio = car.velocity / c.max_speed.max(driving.min_denominator);
    let load = driving.wear_base
        + driving.wear_curvature * track.curvature_at(car.s)
        + driving.wear_speed * speed_ratio;
    car.energy = (car.energy - c.wear_rate * load * dt).clamp(0.0, 1.0);
}

/// Soft path into the pit: low energy plans a stop for the next lap
fn arm_pit_request(car: &mut Car, tuning: &PitTuning) {
    if car.want_pit || car.planned_pit_lap.is_some() || car.pit_state.in_pit() {
        return;
    }
    if car.energy < car.coefficients.pit_energy_threshold * tuning.arm_factor {
        car.planned_pit_lap = Some(car.lap + 1);
        log::debug!("car {} armed a pit stop for lap {}", car.id, car.lap + 1);
    }
}

/// Lap bookkeeping at a start/finish crossing, including the pit decision
fn complete_lap<R: Rng + ?Sized>(
    car: &mut Car,
    time_ms: f64,
    tuning: &PitTuning,
    min_lap_ms: f64,
    rng: &mut R,
) {
    car.lap += 1;
    if let Some(lap_ms) = car.timing.record_crossing(time_ms, min_lap_ms) {
        log::debug!("car {} lap {} in {:.0} ms", car.id, car.lap, lap_ms);
    }
    if car.pit_state.in_pit() {
        return;
    }
    car.laps_since_pit += 1;

    if car.planned_pit_lap.is_none()
        && !car.want_pit
        && car.laps_since_pit >= tuning.min_laps_before_pit
    {
        let extra = (car.laps_since_pit - tuning.min_laps_before_pit) as f32;
        let threshold =
            car.coefficients.pit_energy_threshold + extra * tuning.threshold_per_extra_lap;
        let incident = (car.coefficients.incident_probability
            + extra * tuning.incident_per_extra_lap)
            .clamp(0.0, 1.0);
        let draw: f32 = rng.gen();
        if car.energy < threshold || draw < incident {
            car.planned_pit_lap = Some(car.lap + 1);
            log::debug!(
                "car {} plans to pit on lap {} (energy {:.2}, threshold {:.2})",
                car.id,
                car.lap + 1,
                car.energy,
                threshold
            );
        }
    }

    if car.planned_pit_lap.is_some_and(|lap| car.lap >= lap) {
        car.want_pit = true;
    }
}

/// `none -> entering` when the car is in the entry zone and a stall is free
fn try_enter_pit(car: &mut Car, pit: &mut PitFacility, track: &Track) -> bool {
    let index = track.index_at(car.s);
    if !pit.in_entry_zone(index) {
        return false;
    }
    match pit.claim_stall(car.id, index) {
        Some(stall) => {
            car.pit_stall = Some(stall);
            car.pit_state = PitState::Entering;
            car.duel = None;
            log::debug!("car {} entering pit, stall {}", car.id, stall);
            true
        }
        None => false,
    }
}

/// Straight-line approach to the claimed stall; snaps in when close enough
fn approach_stall<R: Rng + ?Sized>(
    car: &mut Car,
    pit: &PitFacility,
    track: &Track,
    tuning: &PitTuning,
    dt: f32,
    rng: &mut R,
) -> SimResult<()> {
    let stall = car
        .pit_stall
        .and_then(|i| pit.stall(i))
        .filter(|s| s.occupant == Some(car.id))
        .cloned()
        .ok_or(SimError::MissingStall { id: car.id })?;
    let c = car.coefficients;

    let distance = car.pos.distance(stall.pos);
    if distance <= tuning.arrive_tolerance {
        car.pos = stall.pos;
        car.heading = stall.heading;
        car.s = stall.s;
        car.lateral = stall.lateral;
        car.target_lateral = stall.lateral;
        car.velocity = 0.0;
        car.pit_elapsed_ms = 0.0;
        let jitter = tuning.service_jitter.abs();
        let factor = if jitter > 0.0 {
            1.0 + rng.gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        car.pit_target_ms = c.service_ms * factor;
        car.pit_state = PitState::Servicing;
        log::debug!(
            "car {} servicing for {:.0} ms",
            car.id,
            car.pit_target_ms
        );
        return Ok(());
    }

    car.velocity = (car.velocity + c.acceleration * dt).min(c.pit_speed);
    let travel = (car.velocity * dt).min(distance);
    let fraction = travel / distance;
    let direction = (stall.pos - car.pos) * (1.0 / distance);
    car.pos = car.pos + direction * travel;
    car.heading = direction.to_angle();

    let ahead = track.forward_gap(car.s, stall.s);
    if ahead < track.total_length() * 0.5 {
        car.s = track.wrap(car.s + ahead * fraction);
    }
    car.lateral += (stall.lateral - car.lateral) * fraction;
    car.target_lateral = stall.lateral;
    Ok(())
}

/// Stationary service; completion is checked before accumulating time
fn service(car: &mut Car, dt: f32) {
    car.velocity = 0.0;
    if car.pit_elapsed_ms >= car.pit_target_ms {
        car.laps_since_pit = 0;
        car.planned_pit_lap = None;
        car.want_pit = false;
        car.energy = 1.0;
        car.pit_state = PitState::Exiting;
        log::debug!("car {} leaving stall", car.id);
        return;
    }
    car.pit_elapsed_ms += dt * 1000.0;
    car.energy = (car.energy + car.coefficients.refill_rate * dt).clamp(0.0, 1.0);
}

/// Accelerate out of the lane and merge back; frees the stall past the exit
fn leave_pit(
    car: &mut Car,
    pit: &mut PitFacility,
    track: &Track,
    tuning: &PitTuning,
    driving: &DrivingTuning,
    dt: f32,
) {
    let c = car.coefficients;
    car.velocity = approach(
        car.velocity,
        c.max_speed * tuning.exit_speed_fraction,
        c.acceleration * dt,
    );
    let index = track.index_at(car.s);
    let half_width = track.half_width_at(index);
    car.target_lateral = 0.0;
    car.lateral = approach(car.lateral, 0.0, driving.lateral_rate * half_width * dt);
    integrate(car, track, dt);

    if pit.past_exit(track.index_at(car.s)) {
        if let Some(stall) = car.pit_stall.take() {
            pit.release(stall, car.id);
        }
        car.pit_state = PitState::None;
        car.velocity = car.velocity.clamp(c.min_speed, c.max_speed * 1.1);
        log::debug!("car {} rejoined the track", car.id);
    }
}

/// Speed, overtaking and lane decisions for a car on the racing surface
fn drive(
    car: &mut Car,
    index: usize,
    ahead: Option<CarView>,
    views: &[CarView],
    track: &Track,
    driving: &DrivingTuning,
    dt: f32,
) {
    let c = car.coefficients;
    let track_index = track.index_at(car.s);
    let half_width = track.half_width_at(track_index);
    let on_straight = track.straight_blend(track_index) >= driving.straight_blend_cutoff;
    let my_distance = car.race_distance(track.start_s(), track.total_length());
    let ahead = ahead.filter(|a| a.index != index);
    let gap = ahead.map(|a| track.forward_gap(car.s, a.s));

    let mut target = target_speed(car, track, driving);
    if on_straight && gap.is_some_and(|g| g < driving.slipstream_gap) {
        target *= driving.slipstream_bonus;
    }
    let top = c.max_speed * 1.1;
    let target = target.clamp(c.min_speed, top);

    end_duel(car, views, track, on_straight, driving);
    if car.duel.is_none() && !on_straight {
        if let (Some(a), Some(g)) = (ahead, gap) {
            start_duel(car, index, a, g, target, my_distance, views, track, driving);
        }
    }

    let must_brake = match (ahead, gap) {
        (Some(a), Some(g)) => {
            !a.pit_state.in_pit()
                && g < c.safe_gap
                && (car.lateral - a.lateral).abs() < driving.side_by_side_lateral
                && car.duel.is_none()
        }
        _ => false,
    };
    car.velocity = if must_brake {
        car.velocity - c.braking * dt
    } else {
        let rate = if car.velocity < target {
            c.acceleration
        } else {
            c.braking
        };
        approach(car.velocity, target, rate * dt)
    };
    car.velocity = car.velocity.clamp(c.min_speed, top);

    car.target_lateral = match car.duel {
        Some(duel) => duel.side * half_width * driving.duel_lateral_fraction,
        None if on_straight => choose_lane(car, index, ahead, views, track, half_width, driving),
        None => track.curvature_sign_at(car.s) * half_width * driving.racing_line_inside,
    };
    let margin = if car.duel.is_some() {
        driving.duel_edge_margin
    } else {
        driving.edge_margin
    };
    let limit = (half_width - margin).max(0.0);
    let rate = driving.lateral_rate * half_width * dt;
    car.lateral = approach(car.lateral, car.target_lateral, rate).clamp(-limit, limit);
}

/// Cornering speed limit from curvature sampled ahead of the car
fn target_speed(car: &Car, track: &Track, driving: &DrivingTuning) -> f32 {
    let c = &car.coefficients;
    let samples = driving.lookahead.len().max(1) as f32;
    let curvature = driving
        .lookahead
        .iter()
        .map(|offset| track.curvature_at(car.s + offset))
        .sum::<f32>()
        / samples;
    let reduction = (c.cornering_stiffness * driving.curve_gain * curvature).clamp(0.0, 1.0);
    c.max_speed * (1.0 - reduction) * lerp(driving.empty_energy_speed, 1.0, car.energy)
}

fn end_duel(
    car: &mut Car,
    views: &[CarView],
    track: &Track,
    on_straight: bool,
    driving: &DrivingTuning,
) {
    let Some(duel) = car.duel else {
        return;
    };
    let finished = match views.get(duel.partner) {
        None => true,
        Some(partner) => {
            let my_distance = car.race_distance(track.start_s(), track.total_length());
            on_straight
                || partner.pit_state.in_pit()
                || my_distance >= duel.end_distance
                || signed_gap(track, partner.s, car.s) >= driving.duel_clear_gap
        }
    };
    if finished {
        log::debug!("car {} ends duel with car index {}", car.id, duel.partner);
        car.duel = None;
    }
}

#[allow(clippy::too_many_arguments)]
fn start_duel(
    car: &mut Car,
    index: usize,
    ahead: CarView,
    gap: f32,
    target: f32,
    my_distance: f32,
    views: &[CarView],
    track: &Track,
    driving: &DrivingTuning,
) {
    let under_attack = |target: usize| views.iter().any(|v| v.duel_partner == Some(target));
    let defender_busy = ahead.duel_partner.is_some() || under_attack(ahead.index);
    if ahead.pit_state.in_pit()
        || defender_busy
        || under_attack(index)
        || gap > driving.duel_gap
        || target - ahead.velocity <= driving.duel_speed_delta
    {
        return;
    }
    let sign = track.curvature_sign_at(car.s);
    let side = if sign != 0.0 {
        sign
    } else if car.lateral >= ahead.lateral {
        1.0
    } else {
        -1.0
    };
    car.duel = Some(Duel {
        partner: ahead.index,
        side,
        end_distance: my_distance + driving.duel_window,
    });
    log::debug!(
        "car {} attacks car {} on the {} side",
        car.id,
        ahead.id,
        if side > 0.0 { "left" } else { "right" }
    );
}

/// Pick the clearest lane on a straight wide enough for more than one
fn choose_lane(
    car: &Car,
    index: usize,
    ahead: Option<CarView>,
    views: &[CarView],
    track: &Track,
    half_width: f32,
    driving: &DrivingTuning,
) -> f32 {
    let width = half_width * 2.0;
    let lanes = if width >= driving.three_lane_width {
        3
    } else if width >= driving.two_lane_width {
        2
    } else {
        1
    };
    if lanes == 1 {
        return 0.0;
    }

    let usable = (half_width - driving.edge_margin).max(0.0);
    let mut best: Option<(f32, f32, f32)> = None;
    for lane in 0..lanes {
        let center = -usable + 2.0 * usable * lane as f32 / (lanes - 1) as f32;
        let clearance = views
            .iter()
            .filter(|v| v.index != index && !v.pit_state.in_pit())
            .filter(|v| (v.lateral - center).abs() < driving.lane_occupancy)
            .map(|v| track.forward_gap(car.s, v.s))
            .filter(|g| *g > 0.0 && *g <= driving.lane_lookahead)
            .fold(driving.lane_lookahead, f32::min);
        let score = clearance - driving.lane_change_cost * (center - car.lateral).abs();
        if best.map_or(true, |(_, best_score, _)| score > best_score) {
            best = Some((center, score, clearance));
        }
    }

    match (best, ahead) {
        (Some((_, _, clearance)), Some(a)) if clearance < driving.lane_min_clearance => {
            let away = if car.lateral >= a.lateral { 1.0 } else { -1.0 };
            car.lateral + away * driving.lane_bias
        }
        (Some((center, _, _)), _) => center,
        (None, _) => 0.0,
    }
}

/// `s += v * dt`, then re-derive the world pose
pub fn integrate(car: &mut Car, track: &Track, dt: f32) {
    car.s = track.wrap(car.s + car.velocity * dt);
    let pose = track.pose_at(car.s, car.lateral);
    car.pos = pose.pos;
    car.heading = pose.heading;
}

/// World position of a car parked at `s` with `lateral`, facing along the track
pub fn place(car: &mut Car, track: &Track) {
    let pose = track.pose_at(car.s, car.lateral);
    car.pos = pose.pos;
    car.heading = pose.heading;
}
