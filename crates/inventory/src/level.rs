//! Pure stock-counter transitions.

use thiserror::Error;

/// Errors from a single stock transition.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum StockError {
    /// Not enough unreserved stock to cover the request.
    #[error("insufficient stock: available={available}, requested={requested}")]
    Insufficient { available: i64, requested: i64 },

    /// A release or commit would drive `reserved` negative.
    #[error("reserved underflow: reserved={reserved}, requested={requested}")]
    ReservedUnderflow { reserved: i64, requested: i64 },

    /// A commit would drive total `quantity` negative.
    #[error("stock underflow: quantity={quantity}, requested={requested}")]
    StockUnderflow { quantity: i64, requested: i64 },
}

/// Stock counters for one product.
///
/// Invariant: `0 <= reserved <= quantity`. Every transition either returns
/// a new level that satisfies it or fails without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevel {
    pub quantity: i64,
    pub reserved: i64,
}

impl StockLevel {
    /// Creates a level with the given counters.
    pub fn new(quantity: i64, reserved: i64) -> Self {
        Self { quantity, reserved }
    }

    /// Stock not currently held by any reservation.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    /// Places a soft hold on `requested` units.
    pub fn reserve(self, requested: i64) -> Result<Self, StockError> {
        if self.available() < requested {
            return Err(StockError::Insufficient {
                available: self.available(),
                requested,
            });
        }
        Ok(Self {
            quantity: self.quantity,
            reserved: self.reserved + requested,
        })
    }

    /// Returns `requested` held units to the available pool.
    pub fn release(self, requested: i64) -> Result<Self, StockError> {
        if self.reserved < requested {
            return Err(StockError::ReservedUnderflow {
                reserved: self.reserved,
                requested,
            });
        }
        Ok(Self {
            quantity: self.quantity,
            reserved: self.reserved - requested,
        })
    }

    /// Converts `requested` held units into a permanent deduction.
    pub fn commit(self, requested: i64) -> Result<Self, StockError> {
        if self.reserved < requested {
            return Err(StockError::ReservedUnderflow {
                reserved: self.reserved,
                requested,
            });
        }
        if self.quantity < requested {
            return Err(StockError::StockUnderflow {
                quantity: self.quantity,
                requested,
            });
        }
        Ok(Self {
            quantity: self.quantity - requested,
            reserved: self.reserved - requested,
        })
    }

    #[cfg(test)]
    fn holds_invariant(&self) -> bool {
        0 <= self.reserved && self.reserved <= self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reserve_within_available() {
        let level = StockLevel::new(10, 3);
        let next = level.reserve(7).unwrap();
        assert_eq!(next, StockLevel::new(10, 10));
        assert_eq!(next.available(), 0);
    }

    #[test]
    fn test_reserve_beyond_available_fails() {
        let level = StockLevel::new(10, 3);
        let err = level.reserve(8).unwrap_err();
        assert_eq!(
            err,
            StockError::Insufficient {
                available: 7,
                requested: 8
            }
        );
    }

    #[test]
    fn test_release_restores_available() {
        let level = StockLevel::new(10, 0).reserve(4).unwrap();
        let released = level.release(4).unwrap();
        assert_eq!(released, StockLevel::new(10, 0));
    }

    #[test]
    fn test_release_underflow_fails() {
        let err = StockLevel::new(10, 2).release(3).unwrap_err();
        assert_eq!(
            err,
            StockError::ReservedUnderflow {
                reserved: 2,
                requested: 3
            }
        );
    }

    #[test]
    fn test_commit_deducts_both_counters() {
        let level = StockLevel::new(10, 0).reserve(3).unwrap();
        let committed = level.commit(3).unwrap();
        assert_eq!(committed, StockLevel::new(7, 0));
    }

    #[test]
    fn test_commit_without_reservation_fails() {
        let err = StockLevel::new(10, 0).commit(1).unwrap_err();
        assert!(matches!(err, StockError::ReservedUnderflow { .. }));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Reserve(i64),
        Release(i64),
        Commit(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..20i64).prop_map(Op::Reserve),
            (0..20i64).prop_map(Op::Release),
            (0..20i64).prop_map(Op::Commit),
        ]
    }

    proptest! {
        // Invariant: no sequence of reserves/releases/commits can drive
        // `reserved` negative or above `quantity`.
        #[test]
        fn prop_invariant_holds_after_every_transition(
            initial in 0..100i64,
            ops in prop::collection::vec(op_strategy(), 0..64),
        ) {
            let mut level = StockLevel::new(initial, 0);
            prop_assert!(level.holds_invariant());

            for op in ops {
                let result = match op {
                    Op::Reserve(q) => level.reserve(q),
                    Op::Release(q) => level.release(q),
                    Op::Commit(q) => level.commit(q),
                };
                if let Ok(next) = result {
                    level = next;
                }
                prop_assert!(level.holds_invariant());
            }
        }

        // Reserve then release of the same quantity is a no-op.
        #[test]
        fn prop_reserve_release_restores_counters(
            quantity in 0..100i64,
            reserved in 0..100i64,
            request in 0..100i64,
        ) {
            prop_assume!(reserved <= quantity);
            let level = StockLevel::new(quantity, reserved);
            if let Ok(held) = level.reserve(request) {
                prop_assert_eq!(held.release(request).unwrap(), level);
            }
        }
    }
}
