// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]

use proptest::prelude::*;
use stagehand_core::{Mode, ModeId, ModeStack, OverrideRecord, Priority};

struct Layer(Priority);

impl Mode for Layer {
    fn priority(&self) -> Priority {
        self.0
    }

    fn multiple_instance(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Op {
    Push(Priority),
    Pop(usize),
    PushDeferred(Priority),
    Tick,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..64i32).prop_map(Op::Push),
        any::<usize>().prop_map(Op::Pop),
        (0..64i32).prop_map(Op::PushDeferred),
        Just(Op::Tick),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Contribution {
    Quit,
    Lock,
    Slow,
    Fast,
}

impl Mode for Contribution {
    fn priority(&self) -> Priority {
        match self {
            Self::Quit => 1,
            Self::Lock => 2,
            Self::Slow => 3,
            Self::Fast => 4,
        }
    }

    fn multiple_instance(&self) -> bool {
        true
    }

    fn contribute(&self, record: &mut OverrideRecord) {
        match self {
            Self::Quit => record.is_quitting = true,
            Self::Lock => record.has_control = false,
            Self::Slow | Self::Fast => {}
        }
    }

    fn time_scale(&self) -> Option<f32> {
        match self {
            Self::Slow => Some(0.25),
            Self::Fast => Some(2.0),
            Self::Quit | Self::Lock => None,
        }
    }
}

/// Modes that disagree about `has_control`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Deny,
    Grant,
    Revoke,
}

impl Control {
    const fn allows(self) -> bool {
        matches!(self, Self::Grant)
    }
}

impl Mode for Control {
    fn priority(&self) -> Priority {
        match self {
            Self::Deny => 11,
            Self::Grant => 12,
            Self::Revoke => 13,
        }
    }

    fn multiple_instance(&self) -> bool {
        true
    }

    fn contribute(&self, record: &mut OverrideRecord) {
        record.has_control = self.allows();
    }
}

proptest! {
    #[test]
    fn authoritative_mode_is_the_highest_priority_on_stack(
        ops in prop::collection::vec(op(), 0..64)
    ) {
        let mut stack = ModeStack::new();
        let mut on_stack: Vec<(ModeId, Priority)> = Vec::new();
        let mut queued: Vec<(ModeId, Priority)> = Vec::new();

        for op in ops {
            let taken = |p: Priority, a: &[(ModeId, Priority)], b: &[(ModeId, Priority)]| {
                a.iter().chain(b).any(|(_, q)| *q == p)
            };
            match op {
                Op::Push(p) if !taken(p, &on_stack, &queued) => {
                    let id = stack.push(Layer(p)).unwrap();
                    on_stack.push((id, p));
                }
                Op::PushDeferred(p) if !taken(p, &on_stack, &queued) => {
                    let id = stack.push_deferred(Layer(p)).unwrap();
                    queued.push((id, p));
                }
                Op::Pop(i) if !on_stack.is_empty() => {
                    let (id, _) = on_stack.remove(i % on_stack.len());
                    prop_assert!(stack.pop(id));
                }
                Op::Tick => {
                    stack.tick();
                    on_stack.append(&mut queued);
                }
                _ => {}
            }

            let expected = on_stack
                .iter()
                .max_by_key(|(_, p)| *p)
                .map_or(ModeId::DEFAULT, |(id, _)| *id);
            prop_assert_eq!(stack.authoritative(), expected);
            prop_assert_eq!(stack.folded().authoritative, expected);
            prop_assert_eq!(stack.len(), on_stack.len() + 1);
        }
    }

    #[test]
    fn fold_does_not_depend_on_push_order(
        order in Just(vec![
            Contribution::Quit,
            Contribution::Lock,
            Contribution::Slow,
            Contribution::Fast,
        ]).prop_shuffle()
    ) {
        let mut stack = ModeStack::new();
        for mode in order {
            stack.push(mode).unwrap();
        }
        let record = stack.fold();
        prop_assert!(record.is_quitting);
        prop_assert!(!record.has_control);
        prop_assert!(!record.is_loading);
        prop_assert!((record.time_scale - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn contested_field_goes_to_the_highest_priority_writer(
        order in prop::sample::subsequence(
            vec![Control::Deny, Control::Grant, Control::Revoke],
            0..=3,
        )
        .prop_shuffle()
    ) {
        let mut stack = ModeStack::new();
        for mode in &order {
            stack.push(*mode).unwrap();
        }
        let expected = order
            .iter()
            .max_by_key(|mode| mode.priority())
            .is_none_or(|mode| mode.allows());
        prop_assert_eq!(stack.fold().has_control, expected);
        prop_assert_eq!(stack.folded().record.has_control, expected);
    }
}
