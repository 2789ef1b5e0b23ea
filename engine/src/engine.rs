// ═══════════════════════════════════════════════════════════════════════
// Battle Engine — continuation stack, advance loop and action resolution
// This is the orchestrator that pushes a battle forward.
//
// Architecture:
//   The engine is a pure state machine. It never talks to players.
//   Work still to do lives on `state.stack` as serializable continuations.
//   When a player decision is needed the engine sets `state.pending` and
//   stops; the sim/runner code reads it, asks the appropriate agent, and
//   feeds the answer back through `apply_action()`.
//
// Flow:
//   1. `start_battle()` generates abilities and queues the first round
//   2. `advance()` pops continuations until a decision is pending or the
//      battle is over
//   3. Runner reads pending, asks agent, calls `apply_action(state, ..)`
//   4. Repeat until state.outcome is Some
//
// Dice and history are borrowed capabilities (`Context`), so the whole
// battle, stack and pending decision included, survives a JSON round trip.
// ═══════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::casualty::{self, CasualtyDetails, CasualtyRequest};
use crate::dice;
use crate::error::{CombatError, Result};
use crate::generator;
use crate::history::Context;
use crate::retreat;
use crate::splitter::{self, FiringGroup};
use crate::steps::{self, StepKind, REMOVE_BOMBARDMENT_CASUALTIES, REMOVE_CASUALTIES};
use crate::types::*;

/// Answers an agent can give to `state.pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Casualties for a `SelectCasualties` request.
    SelectCasualties(CasualtyDetails),
    /// Destination for a `Retreat` request. `None` stays and fights; the
    /// battle site means submerge.
    Retreat(Option<TerritoryId>),
}

/// One unit of queued work. The top of the stack is the last element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuation {
    /// Derive this round's steps and queue them.
    BeginRound,
    /// Run a step whose content is worked out when it executes.
    Step { kind: StepKind, names: Vec<String> },
    /// Roll for one firing group and allocate its hits.
    Fire { kind: FireKind, side: Side, group: FiringGroup },
    /// Take the waiting-to-die units of `sides` out of the battle.
    RemoveCasualties { name: String, sides: Vec<Side>, end_of_round: bool },
    EndRound,
}

// ── Entry points ───────────────────────────────────────────────────────

/// Generate abilities for the players in the battle and queue round one.
pub fn start_battle(state: &mut BattleState, ctx: &mut Context) -> Result<()> {
    let mut phases = std::mem::take(&mut state.abilities);
    let generated = generator::generate(&state.players, &state.unit_types, &mut phases, &state.rules);
    state.abilities = phases;
    generated?;

    state.stack.clear();
    state.pending = None;
    state.outcome = None;
    info!(
        site = %state.battle_site().name,
        attacker = %state.player_name(state.attacker),
        defender = %state.player_name(state.defender),
        attackers = state.alive(Side::Offense).len(),
        defenders = state.alive(Side::Defense).len(),
        "battle start"
    );
    ctx.history.event(&format!(
        "{} attack {} in {}",
        state.player_name(state.attacker),
        state.player_name(state.defender),
        state.battle_site().name
    ));

    check_battle_end(state);
    if state.is_over() {
        conclude(state, ctx);
        return Ok(());
    }
    state.stack.push(Continuation::BeginRound);
    Ok(())
}

/// Run queued work until a player decision is needed or the battle ends.
pub fn advance(state: &mut BattleState, ctx: &mut Context) -> Result<()> {
    loop {
        if state.pending.is_some() {
            return Ok(());
        }
        if state.is_over() {
            state.stack.clear();
            return Ok(());
        }
        let Some(next) = state.stack.pop() else { return Ok(()) };
        execute(state, ctx, next)?;
        if state.is_over() {
            conclude(state, ctx);
        }
    }
}

/// Apply a player's answer to the pending decision, then keep going.
/// A rejected answer leaves the same decision pending.
pub fn apply_action(state: &mut BattleState, ctx: &mut Context, action: Action) -> Result<()> {
    let Some(pending) = state.pending.take() else {
        return Err(CombatError::InvalidAction("no decision is pending".into()));
    };

    let result = match (&pending, action) {
        (PendingDecision::SelectCasualties(request), Action::SelectCasualties(details)) => {
            select_casualties(state, ctx, request, details)
        }
        (PendingDecision::Retreat(request), Action::Retreat(choice)) => {
            retreat::retreat_units(state, ctx.history, request, choice)
        }
        (_, action) => Err(CombatError::InvalidAction(format!("{:?} does not answer the pending decision", action))),
    };

    if let Err(err) = result {
        warn!(player = %state.player_name(pending.player()), error = %err, "action rejected");
        state.pending = Some(pending);
        return Err(err);
    }

    if state.is_over() {
        conclude(state, ctx);
    }
    advance(state, ctx)
}

pub fn save_state(state: &BattleState) -> Result<String> {
    Ok(serde_json::to_string_pretty(state)?)
}

/// Restore a saved battle. The ability index is rebuilt before returning.
pub fn load_state(json: &str) -> Result<BattleState> {
    let mut state: BattleState = serde_json::from_str(json)?;
    state.abilities.reindex();
    Ok(state)
}

// ── Continuations ──────────────────────────────────────────────────────

fn execute(state: &mut BattleState, ctx: &mut Context, next: Continuation) -> Result<()> {
    match next {
        Continuation::BeginRound => begin_round(state, ctx),
        Continuation::Step { kind, names } => run_step(state, ctx, kind, &names),
        Continuation::Fire { kind, side, group } => fire(state, ctx, kind, side, group),
        Continuation::RemoveCasualties { name, sides, end_of_round } => {
            ctx.history.start_step(&name);
            remove_casualties(state, ctx, &sides);
            if end_of_round && !state.is_over() && !Side::ALL.iter().any(|s| can_fire(state, *s)) {
                debug!(round = state.round, "neither side can fire");
                state.outcome = Some(WhoWon::Draw);
            }
            Ok(())
        }
        Continuation::EndRound => {
            if state.rules.round_limit().is_some_and(|limit| state.round >= limit) {
                debug!(round = state.round, "round limit reached");
                state.outcome = Some(WhoWon::Draw);
                return Ok(());
            }
            state.round += 1;
            state.stack.push(Continuation::BeginRound);
            Ok(())
        }
    }
}

fn begin_round(state: &mut BattleState, ctx: &mut Context) -> Result<()> {
    let round = steps::round_steps(state);
    state.step_names = steps::step_names(&round);
    debug!(round = state.round, steps = ?state.step_names, "round start");
    ctx.history.event(&format!("round {}", state.round));

    let mut queued = Vec::with_capacity(round.len() + 1);
    for step in round {
        let first = step.names.first().cloned().unwrap_or_default();
        queued.push(match step.kind {
            StepKind::ClearFirstStrikeCasualties => {
                let sides = steps::sneak_casualty_sides(state).map(|(sides, _)| sides).unwrap_or_default();
                Continuation::RemoveCasualties { name: first, sides, end_of_round: false }
            }
            StepKind::RemoveCasualties => Continuation::RemoveCasualties {
                name: REMOVE_CASUALTIES.to_string(),
                sides: Side::ALL.to_vec(),
                end_of_round: true,
            },
            kind => Continuation::Step { kind, names: step.names },
        });
    }
    queued.push(Continuation::EndRound);
    state.stack.extend(queued.into_iter().rev());
    Ok(())
}

fn push_fire(state: &mut BattleState, kind: FireKind, side: Side, groups: Vec<FiringGroup>) {
    for group in groups.into_iter().rev() {
        state.stack.push(Continuation::Fire { kind, side, group });
    }
}

fn run_step(state: &mut BattleState, ctx: &mut Context, kind: StepKind, names: &[String]) -> Result<()> {
    let name = names.first().map(String::as_str).unwrap_or_default();
    match kind {
        StepKind::AaFire(side) => {
            let groups = splitter::split_aa(state, side);
            push_fire(state, FireKind::Aa, side, groups);
        }
        StepKind::NavalBombardment => {
            if !state.rules.naval_bombard_casualties_return_fire {
                state.stack.push(Continuation::RemoveCasualties {
                    name: REMOVE_BOMBARDMENT_CASUALTIES.to_string(),
                    sides: vec![Side::Defense],
                    end_of_round: false,
                });
            }
            let groups = splitter::split_bombard(state);
            push_fire(state, FireKind::Bombard, Side::Offense, groups);
        }
        StepKind::FirstStrikeFire(side) => {
            let groups = splitter::split_general(state, side, FireKind::FirstStrike);
            push_fire(state, FireKind::FirstStrike, side, groups);
        }
        StepKind::GeneralFire(side) => {
            let groups = splitter::split_general(state, side, FireKind::General);
            push_fire(state, FireKind::General, side, groups);
        }
        StepKind::RemoveUnprotectedUnits => {
            ctx.history.start_step(name);
            remove_unescorted_transports(state, ctx);
        }
        StepKind::SubmergeSubsVsOnlyAir => {
            ctx.history.start_step(name);
            submerge_subs_vs_only_air(state, ctx);
        }
        StepKind::SubsRetreat { side, .. } => {
            ctx.history.start_step(name);
            let request = match side {
                Side::Offense => retreat::offensive_subs_retreat(state, name),
                Side::Defense => retreat::defensive_subs_retreat(state, name),
            };
            state.pending = request.map(PendingDecision::Retreat);
        }
        StepKind::OffensiveGeneralRetreat => {
            ctx.history.start_step(name);
            state.pending = retreat::offensive_general_retreat(state, name).map(PendingDecision::Retreat);
        }
        // queued as RemoveCasualties by begin_round
        StepKind::ClearFirstStrikeCasualties | StepKind::RemoveCasualties => {}
    }
    Ok(())
}

// ── Fire ───────────────────────────────────────────────────────────────

fn dice_type_for(kind: FireKind) -> DiceType {
    match kind {
        FireKind::Aa => DiceType::Aa,
        FireKind::Bombard => DiceType::Bombard,
        FireKind::FirstStrike | FireKind::General => DiceType::Normal,
    }
}

fn fire(state: &mut BattleState, ctx: &mut Context, kind: FireKind, side: Side, mut group: FiringGroup) -> Result<()> {
    let hit_side = side.opposite();
    let [fire_name, select_name, _] = steps::fire_step_names(state, side, &group.display_name, kind);
    ctx.history.start_step(&fire_name);

    // earlier volleys of the round may have removed units from either end
    let active = state.active(side);
    if kind != FireKind::Bombard {
        group.firing_units.retain(|u| active.contains(u));
    }
    let alive = state.alive(hit_side);
    group.target_units.retain(|u| alive.contains(u));
    if group.firing_units.is_empty() || group.target_units.is_empty() {
        return Ok(());
    }

    let roll = dice::roll_group(state, ctx.dice, &group, side, kind, &fire_name);
    debug!(step = %fire_name, dice = ?roll.values, hits = roll.hits, "rolled");
    ctx.history.event(&format!(
        "{} roll {} dice for {}, {} hits",
        state.player_name(state.player_for(side)),
        roll.values.len(),
        group.display_name,
        roll.hits
    ));

    let dice_type = dice_type_for(kind);
    let after_fire: Vec<UnitId> = group
        .firing_units
        .iter()
        .copied()
        .filter(|u| {
            state
                .abilities
                .unit_ability(state, side, *u, dice_type)
                .is_some_and(|a| a.suicide_after_fire.contains(side))
        })
        .collect();
    if !after_fire.is_empty() {
        state.mark_waiting_to_die(side, &after_fire);
        ctx.history.event(&format!("{} destroyed after firing", state.unit_names(&after_fire)));
    }

    if roll.hits == 0 {
        return Ok(());
    }

    if group.suicide_on_hit {
        let spent: Vec<UnitId> = group.firing_units.iter().copied().take(roll.hits).collect();
        state.kill_now(side, &spent);
        ctx.history.event(&format!("{} destroyed on hit", state.unit_names(&spent)));
        check_battle_end(state);
        if state.is_over() {
            return Ok(());
        }
    }

    let targets = casualty::casualty_targets(state, &group.target_units);
    let mut selection = casualty::default_casualties(state, hit_side, &targets, roll.hits);
    casualty::post_process(state, hit_side, &targets, &mut selection)?;

    if selection.auto_calculated {
        return mark_casualties(state, ctx, kind, side, &group, selection);
    }
    let player = state.player_for(hit_side);
    debug!(player = %state.player_name(player), hits = roll.hits, "casualty selection needed");
    state.pending = Some(PendingDecision::SelectCasualties(CasualtyRequest {
        player,
        hit_side,
        kind,
        step_name: select_name,
        group,
        hits: roll.hits,
        targets,
        default_selection: selection,
    }));
    Ok(())
}

fn select_casualties(
    state: &mut BattleState,
    ctx: &mut Context,
    request: &CasualtyRequest,
    mut details: CasualtyDetails,
) -> Result<()> {
    casualty::validate_selection(state, request, &details)?;
    casualty::post_process(state, request.hit_side, &request.targets, &mut details)?;
    mark_casualties(state, ctx, request.kind, request.hit_side.opposite(), &request.group, details)
}

/// Record damage and kills from one volley. AA kills leave the battle at
/// once; anything else waits for the next removal step.
fn mark_casualties(
    state: &mut BattleState,
    ctx: &mut Context,
    kind: FireKind,
    firing_side: Side,
    group: &FiringGroup,
    details: CasualtyDetails,
) -> Result<()> {
    let hit_side = firing_side.opposite();
    let [_, _, notify_name] = steps::fire_step_names(state, firing_side, &group.display_name, kind);
    ctx.history.start_step(&notify_name);

    for unit in &details.damaged {
        if details.killed.contains(unit) {
            continue;
        }
        let hits = state.unit(*unit).hits;
        if hits.saturating_add(1) >= state.type_of(*unit).hit_points {
            return Err(CombatError::InvariantViolation(format!("damage would kill unit {}", unit.0)));
        }
        state.unit_mut(*unit).hits = hits + 1;
    }
    if !details.damaged.is_empty() {
        ctx.history.event(&format!("{} damaged", state.unit_names(&details.damaged)));
    }

    if !details.killed.is_empty() {
        debug!(side = %hit_side, killed = details.killed.len(), "casualties marked");
        ctx.history.event(&format!("{} killed", state.unit_names(&details.killed)));
        if kind == FireKind::Aa {
            state.kill_now(hit_side, &details.killed);
            check_battle_end(state);
        } else {
            state.mark_waiting_to_die(hit_side, &details.killed);
        }
    }
    Ok(())
}

fn remove_casualties(state: &mut BattleState, ctx: &mut Context, sides: &[Side]) {
    for side in sides {
        let removed = state.clear_waiting_to_die(*side);
        if !removed.is_empty() {
            debug!(side = %side, removed = removed.len(), "casualties removed");
            ctx.history.event(&format!(
                "{} lose {}",
                state.player_name(state.player_for(*side)),
                state.unit_names(&removed)
            ));
        }
    }
    check_battle_end(state);
}

// ── Special steps ──────────────────────────────────────────────────────

fn remove_unescorted_transports(state: &mut BattleState, ctx: &mut Context) {
    for side in Side::ALL {
        let enemy = side.opposite();
        if !retreat::only_defenseless_transports(state, side)
            || !state.any_unit(enemy, &[Status::Alive], |t| t.strength(enemy) > 0)
        {
            continue;
        }
        let lost = state.alive(side);
        state.kill_now(side, &lost);
        ctx.history.event(&format!("{} lost without escort", state.unit_names(&lost)));
    }
    check_battle_end(state);
}

fn submerge_subs_vs_only_air(state: &mut BattleState, ctx: &mut Context) {
    for side in Side::ALL {
        let evaders = steps::evaders_safe_from_air(state, side);
        if evaders.is_empty() {
            continue;
        }
        for unit in &evaders {
            state.unit_mut(*unit).submerged = true;
        }
        state.remove_from_combat(side, &evaders);
        ctx.history.event(&format!("{} submerged", state.unit_names(&evaders)));
        state.retreats.push(RetreatRecord { side, units: evaders, to: state.site, submerged: true });
        if state.active(side).is_empty() {
            state.outcome = Some(winner_against(side));
            return;
        }
    }
}

// ── Battle end ─────────────────────────────────────────────────────────

fn winner_against(side: Side) -> WhoWon {
    match side {
        Side::Offense => WhoWon::Defender,
        Side::Defense => WhoWon::Attacker,
    }
}

fn has_fighting_units(state: &BattleState, side: Side) -> bool {
    state.any_unit(side, &Status::ALL, |t| !t.is_infrastructure)
}

fn check_battle_end(state: &mut BattleState) {
    if state.is_over() {
        return;
    }
    if !has_fighting_units(state, Side::Offense) {
        state.outcome = Some(WhoWon::Defender);
    } else if !has_fighting_units(state, Side::Defense) {
        state.outcome = Some(WhoWon::Attacker);
    }
}

/// A side can fire when some group of it would throw at least one live die.
fn can_fire(state: &BattleState, side: Side) -> bool {
    [FireKind::FirstStrike, FireKind::General].into_iter().any(|kind| {
        splitter::split_general(state, side, kind)
            .iter()
            .any(|g| dice::die_strengths(state, g, side, kind).iter().any(|s| *s > 0))
    })
}

fn conclude(state: &mut BattleState, ctx: &mut Context) {
    state.stack.clear();
    let Some(outcome) = state.outcome else { return };
    let text = match outcome {
        WhoWon::Attacker => format!("{} win", state.player_name(state.attacker)),
        WhoWon::Defender => format!("{} win", state.player_name(state.defender)),
        WhoWon::Draw => "battle ends in a draw".to_string(),
    };
    info!(
        site = %state.battle_site().name,
        round = state.round,
        outcome = %outcome,
        attackers = state.alive(Side::Offense).len(),
        defenders = state.alive(Side::Defense).len(),
        "battle over"
    );
    ctx.history.event(&text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::dice::ScriptedDice;
    use crate::history::RecordingHistory;
    use crate::setup::{Scenario, StackSpec, UnitTypeSpec};

    fn land() -> Scenario {
        Scenario::new("Karelia", false)
            .unit_type(UnitTypeSpec { cost: 3, ..UnitTypeSpec::new("infantry", 1, 2) })
            .unit_type(UnitTypeSpec { cost: 6, ..UnitTypeSpec::new("tank", 3, 3) })
            .unit_type(UnitTypeSpec { cost: 20, hit_points: 2, ..UnitTypeSpec::new("titan", 4, 4) })
    }

    fn run(state: &mut BattleState, dice: &mut ScriptedDice, history: &mut RecordingHistory) {
        let mut ctx = Context::new(dice, history);
        start_battle(state, &mut ctx).unwrap();
        advance(state, &mut ctx).unwrap();
    }

    #[test]
    fn test_attacker_wins_when_defense_wiped() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).into_state().unwrap();
        // tank hits, infantry misses
        let mut dice = ScriptedDice::new(&[0, 5]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Attacker));
        assert_eq!(state.alive(Side::Offense).len(), 1);
        assert!(state.stack.is_empty());
        assert!(history.events().contains(&"Russians win"));
    }

    #[test]
    fn test_defender_returns_fire_before_removal() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).into_state().unwrap();
        // both hit: the infantry is already waiting to die when it fires
        let mut dice = ScriptedDice::new(&[0, 0]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Defender));
        assert_eq!(state.killed.len(), 2);
    }

    #[test]
    fn test_history_follows_step_names() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).into_state().unwrap();
        let mut dice = ScriptedDice::new(&[0, 5]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(
            history.steps(),
            vec!["Russians fire", "Germans notify casualties", "Germans fire", "Remove casualties"]
        );
    }

    #[test]
    fn test_choice_pauses_and_resumes() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).defending("tank", 1).into_state().unwrap();
        state.rules.max_rounds = 1;
        let mut dice = ScriptedDice::new(&[0, 5, 5]);
        let mut history = RecordingHistory::default();
        let mut ctx = Context::new(&mut dice, &mut history);
        start_battle(&mut state, &mut ctx).unwrap();
        advance(&mut state, &mut ctx).unwrap();

        let Some(PendingDecision::SelectCasualties(request)) = state.pending.clone() else {
            panic!("expected a casualty query, got {:?}", state.pending);
        };
        assert_eq!(request.step_name, "Germans select casualties");
        assert_eq!(request.hits, 1);
        // the engine's pick is the cheaper infantry
        let infantry = request.default_selection.killed[0];
        assert_eq!(state.type_of(infantry).name, "infantry");

        let tank = request.targets.iter().copied().find(|u| *u != infantry).unwrap();
        apply_action(&mut state, &mut ctx, Action::SelectCasualties(CasualtyDetails::new(vec![tank], vec![], false)))
            .unwrap();
        assert!(state.killed.contains(&tank));
        assert_eq!(state.outcome, Some(WhoWon::Draw));
    }

    #[test]
    fn test_invalid_selection_keeps_query() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).defending("tank", 1).into_state().unwrap();
        let mut dice = ScriptedDice::new(&[0]);
        let mut history = RecordingHistory::default();
        let mut ctx = Context::new(&mut dice, &mut history);
        start_battle(&mut state, &mut ctx).unwrap();
        advance(&mut state, &mut ctx).unwrap();
        let before = state.pending.clone();
        assert!(before.is_some());

        let err = apply_action(&mut state, &mut ctx, Action::SelectCasualties(CasualtyDetails::default()));
        assert!(matches!(err, Err(CombatError::InvalidAction(_))));
        assert_eq!(state.pending, before);

        let err = apply_action(&mut state, &mut ctx, Action::Retreat(None));
        assert!(matches!(err, Err(CombatError::InvalidAction(_))));
        assert_eq!(state.pending, before);
    }

    #[test]
    fn test_action_without_pending_is_rejected() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).into_state().unwrap();
        let mut dice = ScriptedDice::new(&[]);
        let mut history = RecordingHistory::default();
        let mut ctx = Context::new(&mut dice, &mut history);
        let err = apply_action(&mut state, &mut ctx, Action::Retreat(None));
        assert!(matches!(err, Err(CombatError::InvalidAction(_))));
    }

    #[test]
    fn test_multi_hit_point_unit_soaks_a_hit() {
        let mut state = land().attacking("tank", 1).defending("titan", 1).into_state().unwrap();
        state.rules.max_rounds = 1;
        // tank hits, titan misses, then the round limit ends it
        let mut dice = ScriptedDice::new(&[0, 5]);
        let mut history = RecordingHistory::default();
        let mut ctx = Context::new(&mut dice, &mut history);
        start_battle(&mut state, &mut ctx).unwrap();
        advance(&mut state, &mut ctx).unwrap();

        // a lone two hit point unit is still a choice: die or take damage
        let Some(PendingDecision::SelectCasualties(request)) = state.pending.clone() else {
            panic!("expected a casualty query, got {:?}", state.pending);
        };
        assert!(request.default_selection.killed.is_empty());
        apply_action(&mut state, &mut ctx, Action::SelectCasualties(request.default_selection)).unwrap();

        let titan = state.alive(Side::Defense)[0];
        assert_eq!(state.unit(titan).hits, 1);
        assert_eq!(state.outcome, Some(WhoWon::Draw));
    }

    #[test]
    fn test_round_limit_draw() {
        let mut state = land().attacking("infantry", 1).defending("infantry", 1).into_state().unwrap();
        state.rules.max_rounds = 3;
        let mut dice = ScriptedDice::new(&[5; 6]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Draw));
        assert_eq!(state.round, 3);
    }

    #[test]
    fn test_stalemate_when_nobody_can_fire() {
        let mut state = Scenario::new("Sea Zone 5", true)
            .unit_type(UnitTypeSpec { is_sea: true, is_sea_transport: true, ..UnitTypeSpec::new("transport", 0, 0) })
            .attacking("transport", 1)
            .defending("transport", 1)
            .into_state()
            .unwrap();
        let mut dice = ScriptedDice::new(&[]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Draw));
        assert_eq!(state.round, 1);
    }

    #[test]
    fn test_unescorted_transports_are_lost() {
        let rules = RuleConfig { transport_casualties_restricted: true, ..RuleConfig::default() };
        let mut state = Scenario::new("Sea Zone 5", true)
            .rules(rules)
            .unit_type(UnitTypeSpec { is_sea: true, ..UnitTypeSpec::new("destroyer", 2, 2) })
            .unit_type(UnitTypeSpec { is_sea: true, is_sea_transport: true, ..UnitTypeSpec::new("transport", 0, 0) })
            .attacking("destroyer", 1)
            .defending("transport", 2)
            .into_state()
            .unwrap();
        let mut dice = ScriptedDice::new(&[]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Attacker));
        assert_eq!(state.killed.len(), 2);
        assert!(dice.annotations.is_empty());
    }

    #[test]
    fn test_fireship_spent_on_its_only_hit_ends_battle() {
        let mut state = Scenario::new("Sea Zone 5", true)
            .unit_type(UnitTypeSpec { is_sea: true, is_suicide_on_hit: true, ..UnitTypeSpec::new("fireship", 3, 0) })
            .unit_type(UnitTypeSpec { is_sea: true, ..UnitTypeSpec::new("cruiser", 3, 3) })
            .unit_type(UnitTypeSpec { is_sea: true, is_destroyer: true, ..UnitTypeSpec::new("destroyer", 2, 2) })
            .attacking("fireship", 1)
            .defending("cruiser", 1)
            .defending("destroyer", 1)
            .into_state()
            .unwrap();
        let mut dice = ScriptedDice::new(&[0]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Defender));
        assert!(state.pending.is_none());
        assert!(state.stack.is_empty());
        assert_eq!(state.killed.len(), 1);
        assert_eq!(state.alive(Side::Defense).len(), 2);
        assert_eq!(history.events().iter().filter(|e| **e == "Germans win").count(), 1);
    }

    #[test]
    fn test_amphibious_marine_rolls_with_bonus() {
        let mut state = land()
            .unit_type(UnitTypeSpec { is_marine: 1, ..UnitTypeSpec::new("marine", 1, 2) })
            .attacking_stack(StackSpec { was_amphibious: true, ..StackSpec::new("marine", 1) })
            .amphibious()
            .defending("infantry", 1)
            .into_state()
            .unwrap();
        // a 1 hits at strength 2
        let mut dice = ScriptedDice::new(&[1, 5]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Attacker));
    }

    #[test]
    fn test_save_and_resume_mid_query() {
        let mut state = land().attacking("tank", 1).defending("infantry", 1).defending("tank", 1).into_state().unwrap();
        let mut dice = ScriptedDice::new(&[0]);
        let mut history = RecordingHistory::default();
        let mut ctx = Context::new(&mut dice, &mut history);
        start_battle(&mut state, &mut ctx).unwrap();
        advance(&mut state, &mut ctx).unwrap();

        let json = save_state(&state).unwrap();
        let restored = load_state(&json).unwrap();
        assert_eq!(restored.pending, state.pending);
        assert_eq!(restored.stack, state.stack);
        assert_eq!(save_state(&restored).unwrap(), json);
    }

    #[test]
    fn test_empty_defense_ends_at_start() {
        let mut state = land().attacking("tank", 1).into_state().unwrap();
        let mut dice = ScriptedDice::new(&[]);
        let mut history = RecordingHistory::default();
        run(&mut state, &mut dice, &mut history);
        assert_eq!(state.outcome, Some(WhoWon::Attacker));
        assert!(history.steps().is_empty());
    }
}
