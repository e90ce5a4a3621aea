//! The per-era state machine.
//!
//! An [`EraRuntime`] is bound to one [`Era`] and drives this node's participation in it: it
//! validates inbound messages against the era's rules, reacts to the agenda ticks the round
//! schedule asks for, and produces new messages when this node is bonded, synced and on duty.
//! Runtimes are pure with respect to storage and the network: every side effect they want is
//! returned as a [`HighwayEvent`] for the supervisor to replay, together with the follow-up
//! agenda where applicable.

use std::{
    collections::{HashMap, HashSet},
    convert::TryInto,
    fmt::{self, Debug, Formatter},
};

use crate::{
    agenda::{Action, Agenda},
    config::Config,
    error::ValidationError,
    event::HighwayEvent,
    traits::IsSynced,
    types::{digest, BlockHash, Era, Message, MessageKind, RoundId, Tick, ValidatorId},
};

/// The state machine of a single era.
pub struct EraRuntime {
    /// The era this runtime is bound to.
    era: Era,
    /// The round length, in ticks.
    round_len: u64,
    /// The identity this node produces messages under, if any.
    our_id: Option<ValidatorId>,
    /// Whether this node has finished synchronizing; consulted before producing messages.
    is_synced: IsSynced,
    /// Every message hash this runtime has seen, own messages included.
    known_messages: HashSet<BlockHash>,
    /// The message each validator sent per round and kind; detects equivocation within a round.
    round_messages: HashMap<(ValidatorId, RoundId, MessageKind), BlockHash>,
    /// Switch blocks for which a child era has already been announced.
    created_children: HashSet<BlockHash>,
    /// The hash of the last message this node produced in the era.
    last_own_message: Option<BlockHash>,
}

impl Debug for EraRuntime {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(
            formatter,
            "EraRuntime {{ era: {}, known_messages: {}, .. }}",
            self.era,
            self.known_messages.len()
        )
    }
}

impl EraRuntime {
    /// Creates the runtime for the given era.
    pub fn new(era: Era, config: &Config, is_synced: IsSynced) -> Self {
        EraRuntime {
            era,
            round_len: config.round_len(),
            our_id: config.bonded_validator,
            is_synced,
            known_messages: HashSet::new(),
            round_messages: HashMap::new(),
            created_children: HashSet::new(),
            last_own_message: None,
        }
    }

    /// The era this runtime is bound to.
    pub fn era(&self) -> &Era {
        &self.era
    }

    /// Produces the initial set of delayed actions, given the current tick. Empty iff the era
    /// is already finished.
    pub fn init_agenda(&self, now: Tick) -> Agenda {
        let mut agenda = Agenda::new();
        if now > self.era.end_tick() {
            return agenda;
        }
        if let Some(round_id) = self.first_round_at_or_after(now) {
            agenda.schedule(round_id, Action::StartRound(round_id));
        }
        agenda
    }

    /// Checks an inbound message against the era's rules. Does not mutate.
    pub fn validate(&self, message: &Message) -> Result<(), ValidationError> {
        if message.key_block_hash != self.era.key_block_hash() {
            return Err(ValidationError::WrongEra {
                expected: self.era.key_block_hash(),
                got: message.key_block_hash,
            });
        }
        if !self.era.validators().contains(&message.creator) {
            return Err(ValidationError::SignerNotBonded(message.creator));
        }
        if message.round_id < self.era.start_tick() || message.round_id > self.era.end_tick() {
            return Err(ValidationError::RoundOutOfBounds {
                round: message.round_id,
                start: self.era.start_tick(),
                end: self.era.end_tick(),
            });
        }
        if message.round_id.saturating_diff(self.era.start_tick()) % self.round_len != 0 {
            return Err(ValidationError::MisalignedRound(message.round_id));
        }
        if message.parent_hash != self.era.key_block_hash()
            && !self.known_messages.contains(&message.parent_hash)
        {
            return Err(ValidationError::UnknownParent(message.parent_hash));
        }
        let round_key = (message.creator, message.round_id, message.kind);
        if let Some(existing) = self.round_messages.get(&round_key) {
            if *existing != message.hash {
                return Err(ValidationError::DoubleRoundMessage {
                    creator: message.creator,
                    round: message.round_id,
                    kind: message.kind,
                });
            }
        }
        Ok(())
    }

    /// Reacts to an externally received message that passed [`validate`](Self::validate).
    /// Idempotent under re-delivery: a message whose hash is already known produces nothing.
    pub fn handle_message(&mut self, message: &Message) -> Vec<HighwayEvent> {
        if !self.known_messages.insert(message.hash) {
            return Vec::new();
        }
        self.round_messages.insert(
            (message.creator, message.round_id, message.kind),
            message.hash,
        );

        let mut events = Vec::new();
        if message.kind == MessageKind::Lambda {
            if let Some(response) = self.maybe_respond(message) {
                events.push(HighwayEvent::CreatedLambdaResponse(response));
            }
        }
        if message.kind.is_block_carrying() && self.is_final_round(message.round_id) {
            if let Some(child) = self.maybe_create_child(message.hash) {
                events.push(HighwayEvent::CreatedEra(child));
            }
        }
        events
    }

    /// Fires a scheduled action, returning the emitted events and the follow-up agenda.
    pub fn handle_agenda(&mut self, action: Action) -> (Vec<HighwayEvent>, Agenda) {
        match action {
            Action::StartRound(round_id) => self.start_round(round_id),
            Action::CreateOmegaMessage(round_id) => self.create_omega_message(round_id),
        }
    }

    fn start_round(&mut self, round_id: RoundId) -> (Vec<HighwayEvent>, Agenda) {
        let mut events = Vec::new();
        if self.can_produce() && self.we_lead(round_id) {
            let message = self.create_message(round_id, MessageKind::Lambda);
            let maybe_child = if self.is_final_round(round_id) {
                self.maybe_create_child(message.hash)
            } else {
                None
            };
            events.push(HighwayEvent::CreatedLambdaMessage(message));
            if let Some(child) = maybe_child {
                events.push(HighwayEvent::CreatedEra(child));
            }
        }

        let mut agenda = Agenda::new();
        if self.can_produce() {
            let omega_tick = round_id.add(self.round_len / 2);
            agenda.schedule(omega_tick, Action::CreateOmegaMessage(round_id));
        }
        let next_round = round_id.add(self.round_len);
        if next_round <= self.era.end_tick() {
            agenda.schedule(next_round, Action::StartRound(next_round));
        }
        (events, agenda)
    }

    fn create_omega_message(&mut self, round_id: RoundId) -> (Vec<HighwayEvent>, Agenda) {
        let mut events = Vec::new();
        if self.can_produce() {
            let our_id = self.our_id.expect("can_produce implies an identity");
            let already_sent = self
                .round_messages
                .contains_key(&(our_id, round_id, MessageKind::Omega));
            if !already_sent {
                let message = self.create_message(round_id, MessageKind::Omega);
                events.push(HighwayEvent::CreatedOmegaMessage(message));
            }
        }
        (events, Agenda::new())
    }

    /// Responds to the round leader's lambda message, if this node is a bonded non-leader that
    /// has not responded to the round yet.
    fn maybe_respond(&mut self, message: &Message) -> Option<Message> {
        if !self.can_produce() {
            return None;
        }
        let our_id = self.our_id.expect("can_produce implies an identity");
        if message.creator == our_id || *self.leader(message.round_id) != message.creator {
            return None;
        }
        let already_responded = self.round_messages.contains_key(&(
            our_id,
            message.round_id,
            MessageKind::LambdaResponse,
        ));
        if already_responded {
            return None;
        }
        Some(self.create_message(message.round_id, MessageKind::LambdaResponse))
    }

    /// Announces the child era opened by the given switch block, at most once per block.
    fn maybe_create_child(&mut self, switch_block_hash: BlockHash) -> Option<Era> {
        if !self.created_children.insert(switch_block_hash) {
            return None;
        }
        Some(self.era.child(switch_block_hash))
    }

    /// Creates, records and returns a message produced by this node.
    fn create_message(&mut self, round_id: RoundId, kind: MessageKind) -> Message {
        let creator = self.our_id.expect("only bonded validators create messages");
        let hash = BlockHash::new(digest(&[
            self.era.key_block_hash().as_ref(),
            creator.as_ref(),
            &round_id.value().to_le_bytes(),
            &[kind.tag()],
        ]));
        let parent_hash = self
            .last_own_message
            .unwrap_or_else(|| self.era.key_block_hash());
        let message = Message {
            hash,
            parent_hash,
            key_block_hash: self.era.key_block_hash(),
            round_id,
            creator,
            kind,
        };
        self.last_own_message = Some(hash);
        self.known_messages.insert(hash);
        self.round_messages
            .insert((creator, round_id, kind), hash);
        message
    }

    /// The leader of the given round: weighted pseudo-random selection keyed by the era seed
    /// and the round id, deterministic across nodes.
    fn leader(&self, round_id: RoundId) -> &ValidatorId {
        let result = digest(&[
            &self.era.seed().to_le_bytes(),
            &round_id.value().to_le_bytes(),
        ]);
        let num = u64::from_le_bytes(result[0..std::mem::size_of::<u64>()].try_into().unwrap());
        let validators = self.era.validators();
        validators.by_weighted_index(num % validators.total_weight())
    }

    fn we_lead(&self, round_id: RoundId) -> bool {
        match self.our_id {
            Some(our_id) => *self.leader(round_id) == our_id,
            None => false,
        }
    }

    /// Whether this node produces messages in this era: it has an identity, that identity is
    /// bonded here, and the node has finished synchronizing.
    fn can_produce(&self) -> bool {
        let bonded = self
            .our_id
            .map_or(false, |our_id| self.era.validators().contains(&our_id));
        bonded && (self.is_synced)()
    }

    /// The first round boundary at or after the given tick, if any remains within the era.
    /// Era lengths are a whole number of rounds, so a boundary exists whenever
    /// `tick <= end_tick`.
    fn first_round_at_or_after(&self, tick: Tick) -> Option<RoundId> {
        let offset = tick.saturating_diff(self.era.start_tick());
        let rounds_up = (offset + self.round_len - 1) / self.round_len;
        let round_id = self.era.start_tick().add(rounds_up * self.round_len);
        if round_id <= self.era.end_tick() {
            Some(round_id)
        } else {
            None
        }
    }

    /// Whether the given round is the era's last: the next boundary would fall past the end.
    fn is_final_round(&self, round_id: RoundId) -> bool {
        round_id.value() + self.round_len > self.era.end_tick().value()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::ValidationError,
        testing::{
            block_hash, era_with_bounds, never_synced, runtime_config, synced, validator_id,
            validators,
        },
    };

    const ROUND_EXP: u8 = 2; // round length 4

    fn runtime(era: Era, bonded: Option<ValidatorId>) -> EraRuntime {
        EraRuntime::new(era, &runtime_config(ROUND_EXP, bonded), synced())
    }

    fn ballot_in(era: &Era, creator: ValidatorId, round: u64, id: u8) -> Message {
        Message {
            hash: block_hash(id),
            parent_hash: era.key_block_hash(),
            key_block_hash: era.key_block_hash(),
            round_id: Tick::from(round),
            creator,
            kind: MessageKind::Ballot,
        }
    }

    /// Finds a round within the era bounds that the given validator leads.
    fn round_led_by(runtime: &EraRuntime, id: &ValidatorId) -> RoundId {
        let mut round_id = runtime.era().start_tick();
        while round_id <= runtime.era().end_tick() {
            if runtime.leader(round_id) == id {
                return round_id;
            }
            round_id = round_id.add(runtime.round_len);
        }
        panic!("{} leads no round in {}", id, runtime.era());
    }

    #[test]
    fn leader_schedule_is_deterministic() {
        let era = era_with_bounds(1, 100, 132, validators(&[(1, 3), (2, 5), (3, 2)]));
        let left = runtime(era.clone(), None);
        let right = runtime(era.clone(), None);
        let mut round_id = era.start_tick();
        while round_id <= era.end_tick() {
            let leader = left.leader(round_id);
            assert_eq!(leader, right.leader(round_id));
            assert!(era.validators().contains(leader));
            round_id = round_id.add(4);
        }
    }

    #[test]
    fn single_validator_leads_every_round() {
        let era = era_with_bounds(1, 0, 16, validators(&[(7, 1)]));
        let runtime = runtime(era, None);
        for round in &[0u64, 4, 8, 12, 16] {
            assert_eq!(&validator_id(7), runtime.leader(Tick::from(*round)));
        }
    }

    #[test]
    fn init_agenda_is_empty_for_finished_eras() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1)]));
        let runtime = runtime(era, Some(validator_id(1)));
        assert!(runtime.init_agenda(Tick::from(17)).is_empty());
    }

    #[test]
    fn init_agenda_schedules_the_next_round_boundary() {
        let era = era_with_bounds(1, 100, 132, validators(&[(1, 1)]));
        let runtime = runtime(era, Some(validator_id(1)));

        // Before the era starts, the first round is the era start.
        let agenda = runtime.init_agenda(Tick::from(40));
        let delayed: Vec<_> = agenda.iter().copied().collect();
        assert_eq!(1, delayed.len());
        assert_eq!(Tick::from(100), delayed[0].tick);
        assert_eq!(Action::StartRound(Tick::from(100)), delayed[0].action);

        // Mid-round, the next boundary is scheduled.
        let agenda = runtime.init_agenda(Tick::from(101));
        let delayed: Vec<_> = agenda.iter().copied().collect();
        assert_eq!(Action::StartRound(Tick::from(104)), delayed[0].action);

        // Exactly on a boundary, that round is scheduled.
        let agenda = runtime.init_agenda(Tick::from(108));
        let delayed: Vec<_> = agenda.iter().copied().collect();
        assert_eq!(Action::StartRound(Tick::from(108)), delayed[0].action);
    }

    #[test]
    fn start_round_produces_lambda_and_chains_the_schedule() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1)]));
        let mut runtime = runtime(era, Some(validator_id(1)));

        let (events, agenda) = runtime.handle_agenda(Action::StartRound(Tick::from(0)));
        assert_eq!(1, events.len());
        match &events[0] {
            HighwayEvent::CreatedLambdaMessage(message) => {
                assert_eq!(MessageKind::Lambda, message.kind);
                assert_eq!(Tick::from(0), message.round_id);
                assert_eq!(validator_id(1), message.creator);
            }
            other => panic!("expected lambda message, got {}", other),
        }

        let delayed: Vec<_> = agenda.iter().copied().collect();
        assert_eq!(2, delayed.len());
        assert_eq!(
            Action::CreateOmegaMessage(Tick::from(0)),
            delayed[0].action
        );
        assert_eq!(Tick::from(2), delayed[0].tick);
        assert_eq!(Action::StartRound(Tick::from(4)), delayed[1].action);
        assert_eq!(Tick::from(4), delayed[1].tick);
    }

    #[test]
    fn observer_schedules_rounds_but_produces_nothing() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1)]));
        let mut runtime = runtime(era, None);

        let (events, agenda) = runtime.handle_agenda(Action::StartRound(Tick::from(0)));
        assert!(events.is_empty());
        let delayed: Vec<_> = agenda.iter().copied().collect();
        assert_eq!(1, delayed.len());
        assert_eq!(Action::StartRound(Tick::from(4)), delayed[0].action);
    }

    #[test]
    fn unsynced_node_is_silent() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1)]));
        let config = runtime_config(ROUND_EXP, Some(validator_id(1)));
        let mut runtime = EraRuntime::new(era, &config, never_synced());

        let (events, agenda) = runtime.handle_agenda(Action::StartRound(Tick::from(0)));
        assert!(events.is_empty());
        // The round schedule keeps ticking so production resumes once synced.
        assert_eq!(1, agenda.len());

        let (events, _) = runtime.handle_agenda(Action::CreateOmegaMessage(Tick::from(0)));
        assert!(events.is_empty());
    }

    #[test]
    fn omega_message_is_produced_once_per_round() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1)]));
        let mut runtime = runtime(era, Some(validator_id(1)));

        let (events, _) = runtime.handle_agenda(Action::CreateOmegaMessage(Tick::from(4)));
        assert_eq!(1, events.len());
        match &events[0] {
            HighwayEvent::CreatedOmegaMessage(message) => {
                assert_eq!(MessageKind::Omega, message.kind)
            }
            other => panic!("expected omega message, got {}", other),
        }

        let (events, _) = runtime.handle_agenda(Action::CreateOmegaMessage(Tick::from(4)));
        assert!(events.is_empty());
    }

    #[test]
    fn final_round_lambda_opens_the_child_era() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1)]));
        let mut runtime = runtime(era.clone(), Some(validator_id(1)));

        let (events, _) = runtime.handle_agenda(Action::StartRound(Tick::from(16)));
        assert_eq!(2, events.len());
        let lambda_hash = match &events[0] {
            HighwayEvent::CreatedLambdaMessage(message) => message.hash,
            other => panic!("expected lambda message, got {}", other),
        };
        match &events[1] {
            HighwayEvent::CreatedEra(child) => {
                assert_eq!(lambda_hash, child.key_block_hash());
                assert_eq!(Some(era.key_block_hash()), child.parent_key_block_hash());
                assert_eq!(era.end_tick(), child.start_tick());
            }
            other => panic!("expected created era, got {}", other),
        }
    }

    #[test]
    fn lambda_response_is_emitted_once() {
        let era = era_with_bounds(1, 0, 256, validators(&[(1, 1), (2, 1)]));
        let mut runtime = runtime(era.clone(), Some(validator_id(1)));
        let round_id = round_led_by(&runtime, &validator_id(2));

        let lambda = Message {
            hash: block_hash(100),
            parent_hash: era.key_block_hash(),
            key_block_hash: era.key_block_hash(),
            round_id,
            creator: validator_id(2),
            kind: MessageKind::Lambda,
        };

        let events = runtime.handle_message(&lambda);
        assert_eq!(1, events.len());
        match &events[0] {
            HighwayEvent::CreatedLambdaResponse(response) => {
                assert_eq!(MessageKind::LambdaResponse, response.kind);
                assert_eq!(round_id, response.round_id);
                assert_eq!(validator_id(1), response.creator);
            }
            other => panic!("expected lambda response, got {}", other),
        }

        // Re-delivery of a known message produces nothing.
        assert!(runtime.handle_message(&lambda).is_empty());
    }

    #[test]
    fn non_leader_lambda_gets_no_response() {
        let era = era_with_bounds(1, 0, 256, validators(&[(1, 1), (2, 1), (3, 1)]));
        let mut runtime = runtime(era.clone(), Some(validator_id(1)));
        // Find a round that validator 2 does *not* lead and have them send a lambda anyway.
        let mut round_id = era.start_tick();
        while runtime.leader(round_id) == &validator_id(2) {
            round_id = round_id.add(4);
        }
        let lambda = Message {
            hash: block_hash(101),
            parent_hash: era.key_block_hash(),
            key_block_hash: era.key_block_hash(),
            round_id,
            creator: validator_id(2),
            kind: MessageKind::Lambda,
        };
        assert!(runtime.handle_message(&lambda).is_empty());
    }

    #[test]
    fn switch_block_message_creates_the_child_era_once() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1), (2, 1)]));
        let mut runtime = runtime(era.clone(), None);

        let mut switch_block = ballot_in(&era, validator_id(2), 16, 102);
        switch_block.kind = MessageKind::Block;

        let events = runtime.handle_message(&switch_block);
        assert_eq!(1, events.len());
        match &events[0] {
            HighwayEvent::CreatedEra(child) => {
                assert_eq!(switch_block.hash, child.key_block_hash())
            }
            other => panic!("expected created era, got {}", other),
        }

        assert!(runtime.handle_message(&switch_block).is_empty());
    }

    #[test]
    fn mid_era_blocks_do_not_open_child_eras() {
        let era = era_with_bounds(1, 0, 16, validators(&[(1, 1), (2, 1)]));
        let mut runtime = runtime(era.clone(), None);
        let mut block = ballot_in(&era, validator_id(2), 8, 103);
        block.kind = MessageKind::Block;
        assert!(runtime.handle_message(&block).is_empty());
    }

    #[test]
    fn validate_rejects_rule_violations() {
        let era = era_with_bounds(1, 100, 132, validators(&[(1, 1), (2, 1)]));
        let runtime = runtime(era.clone(), None);

        let ok = ballot_in(&era, validator_id(2), 104, 104);
        assert_eq!(Ok(()), runtime.validate(&ok));

        let mut wrong_era = ok.clone();
        wrong_era.key_block_hash = block_hash(99);
        assert!(matches!(
            runtime.validate(&wrong_era),
            Err(ValidationError::WrongEra { .. })
        ));

        let unbonded = ballot_in(&era, validator_id(9), 104, 105);
        assert_eq!(
            Err(ValidationError::SignerNotBonded(validator_id(9))),
            runtime.validate(&unbonded)
        );

        let early = ballot_in(&era, validator_id(2), 96, 106);
        assert!(matches!(
            runtime.validate(&early),
            Err(ValidationError::RoundOutOfBounds { .. })
        ));

        let late = ballot_in(&era, validator_id(2), 136, 107);
        assert!(matches!(
            runtime.validate(&late),
            Err(ValidationError::RoundOutOfBounds { .. })
        ));

        let misaligned = ballot_in(&era, validator_id(2), 106, 108);
        assert_eq!(
            Err(ValidationError::MisalignedRound(Tick::from(106))),
            runtime.validate(&misaligned)
        );

        let mut orphan = ballot_in(&era, validator_id(2), 104, 109);
        orphan.parent_hash = block_hash(77);
        assert_eq!(
            Err(ValidationError::UnknownParent(block_hash(77))),
            runtime.validate(&orphan)
        );
    }

    #[test]
    fn validate_accepts_known_parents_and_catches_double_rounds() {
        let era = era_with_bounds(1, 0, 32, validators(&[(1, 1), (2, 1)]));
        let mut runtime = runtime(era.clone(), None);

        let first = ballot_in(&era, validator_id(2), 4, 110);
        assert_eq!(Ok(()), runtime.validate(&first));
        runtime.handle_message(&first);

        // A message whose parent is the earlier one is accepted.
        let mut second = ballot_in(&era, validator_id(2), 8, 111);
        second.parent_hash = first.hash;
        assert_eq!(Ok(()), runtime.validate(&second));
        runtime.handle_message(&second);

        // Re-validating the identical message is fine.
        assert_eq!(Ok(()), runtime.validate(&first));

        // A *different* ballot in the same round by the same creator is not.
        let double = ballot_in(&era, validator_id(2), 4, 112);
        assert_eq!(
            Err(ValidationError::DoubleRoundMessage {
                creator: validator_id(2),
                round: Tick::from(4),
                kind: MessageKind::Ballot,
            }),
            runtime.validate(&double)
        );
    }
}
