//! Skins offered by the storefront and their prices.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkinError {
    #[error("no skin with id {id}")]
    UnknownSkin { id: u32 },
    #[error("price {price} cannot be expressed with {decimals} decimals")]
    FractionalDust { price: Decimal, decimals: u8 },
    #[error("price {price} overflows at {decimals} decimals")]
    ArithmeticOverflow { price: Decimal, decimals: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skin {
    pub id: u32,
    pub name: &'static str,
    /// Price in whole token units.
    pub price: Decimal,
}

impl fmt::Display for Skin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} ({})", self.id, self.name, self.price)
    }
}

/// Id, name and price in hundredths of a token.
const CATALOG: [(u32, &str, i64); 8] = [
    (1, "Dragon's Breath", 50),
    (2, "Neon Fury", 40),
    (3, "Arctic Frost", 60),
    (4, "Crimson Elite", 55),
    (5, "Shadow Ops", 45),
    (6, "Golden Phoenix", 70),
    (7, "Cyber Punk", 50),
    (8, "Spectrum", 65),
];

pub fn catalog() -> Vec<Skin> {
    CATALOG
        .iter()
        .map(|&(id, name, hundredths)| Skin {
            id,
            name,
            price: Decimal::new(hundredths, 2),
        })
        .collect()
}

pub fn find(id: u32) -> Result<Skin, SkinError> {
    catalog()
        .into_iter()
        .find(|skin| skin.id == id)
        .ok_or(SkinError::UnknownSkin { id })
}

impl Skin {
    /// Price scaled to the token's smallest unit, e.g. 0.5 at 6 decimals
    /// is 500000.
    pub fn price_in_smallest_unit(&self, decimals: u8) -> Result<U256, SkinError> {
        let overflow = || SkinError::ArithmeticOverflow {
            price: self.price,
            decimals,
        };

        let scaled = (0..decimals).try_fold(self.price, |acc, _| {
            acc.checked_mul(Decimal::TEN).ok_or_else(overflow)
        })?;

        if !scaled.fract().is_zero() {
            return Err(SkinError::FractionalDust {
                price: self.price,
                decimals,
            });
        }

        scaled.to_u128().map(U256::from).ok_or_else(overflow)
    }
}
