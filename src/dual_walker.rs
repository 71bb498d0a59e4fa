//! Lockstep walk of an action tree and a per-player chance tree.
//!
//! The merged sequence is the preorder of the product tree seen by one
//! player: betting actions interleaved with the player's own deals. Inside
//! a betting round the walk follows the action tree; where an action ends
//! the round (its children belong to a later round) the walk switches to
//! the chance children of the current deal, and every chance node switches
//! back to the children of the action that opened it.

use crate::action_tree::ActionTree;
use crate::chance_tree::ChanceTree;
use crate::children_index::ChildrenIndex;
use crate::error::{TreeError, TreeResult};

/// Which tree a merged node comes from, with its id there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeSource {
    Action(u64),
    Chance(u64),
}

pub trait DualVisitor {
    fn visit(&mut self, source: TreeSource, depth: usize) -> TreeResult<()>;
}

impl<F> DualVisitor for F
where
    F: FnMut(TreeSource, usize) -> TreeResult<()>,
{
    fn visit(&mut self, source: TreeSource, depth: usize) -> TreeResult<()> {
        self(source, depth)
    }
}

pub struct DualTreeWalker<'a> {
    action: &'a ActionTree,
    chance: &'a ChanceTree,
    action_children: ChildrenIndex,
    chance_children: ChildrenIndex,
    /// Action nodes whose children open a new round.
    switches: Vec<bool>,
}

impl<'a> DualTreeWalker<'a> {
    pub fn new(action: &'a ActionTree, chance: &'a ChanceTree) -> TreeResult<Self> {
        if chance.deals_per_round() != 1 {
            return Err(TreeError::InvalidArgument(
                "dual walk needs a player chance tree".to_string(),
            ));
        }
        if action.players() != chance.players() || action.rounds() != chance.rounds() {
            return Err(TreeError::Mismatch(format!(
                "action tree has {} players and {} rounds, chance tree {} and {}",
                action.players(),
                action.rounds(),
                chance.players(),
                chance.rounds()
            )));
        }
        let action_children = ChildrenIndex::build(action.tree())?;
        let chance_children = ChildrenIndex::build(chance.tree())?;

        let mut switches = vec![false; action.len() as usize];
        for a in 0..action.len() {
            let kids = action_children.children(a);
            let Some(&first) = kids.first() else {
                continue;
            };
            let round = action.node(a).round;
            let next = action.node(first as u64).round;
            if kids.iter().any(|&k| action.node(k as u64).round != next) {
                return Err(TreeError::Mismatch(format!(
                    "children of action node {} span several rounds",
                    a
                )));
            }
            if next < round || next > round + 1 {
                return Err(TreeError::Mismatch(format!(
                    "action node {} in round {} has children in round {}",
                    a, round, next
                )));
            }
            switches[a as usize] = next > round;
        }

        Ok(DualTreeWalker {
            action,
            chance,
            action_children,
            chance_children,
            switches,
        })
    }

    pub fn action_children(&self) -> &ChildrenIndex {
        &self.action_children
    }

    /// Visit the merged tree in preorder. The chance root is merged into
    /// the action root.
    pub fn walk<V: DualVisitor + ?Sized>(&self, visitor: &mut V) -> TreeResult<()> {
        self.walk_action(0, 0, 0, visitor)
    }

    fn walk_action<V: DualVisitor + ?Sized>(
        &self,
        a: u64,
        ch: u64,
        depth: usize,
        visitor: &mut V,
    ) -> TreeResult<()> {
        visitor.visit(TreeSource::Action(a), depth)?;
        if self.switches[a as usize] {
            let deals = self.chance_children.children(ch);
            if deals.is_empty() {
                return Err(TreeError::Mismatch(format!(
                    "action node {} opens round {} but chance node {} deals nothing",
                    a,
                    self.action.node(a).round + 1,
                    ch
                )));
            }
            for &c in deals {
                self.walk_chance(c as u64, a, depth + 1, visitor)?;
            }
        } else {
            for &k in self.action_children.children(a) {
                self.walk_action(k as u64, ch, depth + 1, visitor)?;
            }
        }
        Ok(())
    }

    fn walk_chance<V: DualVisitor + ?Sized>(
        &self,
        c: u64,
        a: u64,
        depth: usize,
        visitor: &mut V,
    ) -> TreeResult<()> {
        debug_assert!(c < self.chance.len());
        visitor.visit(TreeSource::Chance(c), depth)?;
        for &k in self.action_children.children(a) {
            self.walk_action(k as u64, c, depth + 1, visitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameDef;

    #[test]
    fn kuhn_merged_sequence() {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap().extract_player(0).unwrap();
        let walker = DualTreeWalker::new(&action, &chance).unwrap();

        let mut seen = Vec::new();
        walker
            .walk(&mut |source: TreeSource, depth: usize| -> TreeResult<()> {
                seen.push((source, depth));
                Ok(())
            })
            .unwrap();

        // root, two blinds, then per card: deal + 8 betting nodes
        assert_eq!(seen.len(), 3 + 3 * 9);
        assert_eq!(seen[0], (TreeSource::Action(0), 0));
        assert_eq!(seen[2], (TreeSource::Action(2), 2));
        assert_eq!(seen[3], (TreeSource::Chance(1), 3));
        assert_eq!(seen[4], (TreeSource::Action(3), 4));
        for w in seen.windows(2) {
            assert!(w[1].1 <= w[0].1 + 1);
        }
    }

    #[test]
    fn rejects_joint_chance_tree() {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap();
        assert!(DualTreeWalker::new(&action, &chance).is_err());
    }

    #[test]
    fn visitor_error_aborts_walk() {
        let def = GameDef::kuhn();
        let action = ActionTree::from_game_def(&def).unwrap();
        let chance = ChanceTree::from_game_def(&def).unwrap().extract_player(1).unwrap();
        let walker = DualTreeWalker::new(&action, &chance).unwrap();
        let mut visits = 0;
        let result = walker.walk(&mut |_: TreeSource, _: usize| -> TreeResult<()> {
            visits += 1;
            if visits == 5 {
                return Err(TreeError::Mismatch("stop".to_string()));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(visits, 5);
    }
}
