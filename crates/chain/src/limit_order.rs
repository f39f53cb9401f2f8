//! Limit-order protocol call reconstruction.
//!
//! This is the only module that knows the on-chain shape of an order. A
//! persisted order carries three opaque blobs (`traits`, `signature`,
//! `extension`); they are forwarded here into a `fillOrderArgs` call without
//! the rest of the resolver ever looking inside them.
//!
//! # Call shape
//!
//! ```text
//! fillOrderArgs(
//!     (salt, maker, receiver, makerAsset, takerAsset, makingAmount, takingAmount, makerTraits),
//!     r, vs,                 // compact (EIP-2098) signature
//!     amount,                // making amount to fill
//!     takerTraits,           // built here: flags | args extension length | threshold
//!     args                   // extension bytes, verbatim
//! )
//! ```
//!
//! A protocol upgrade should only ever touch this file.

use alloy::primitives::{uint, Address, Bytes, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolCall;
use thiserror::Error;

sol! {
    /// Protocol order struct. Addresses are packed into uint256 words.
    #[derive(Debug, PartialEq, Eq)]
    struct LimitOrder {
        uint256 salt;
        uint256 maker;
        uint256 receiver;
        uint256 makerAsset;
        uint256 takerAsset;
        uint256 makingAmount;
        uint256 takingAmount;
        uint256 makerTraits;
    }

    /// Settlement contract interface.
    interface ILimitOrderProtocol {
        function fillOrderArgs(
            LimitOrder calldata order,
            bytes32 r,
            bytes32 vs,
            uint256 amount,
            uint256 takerTraits,
            bytes calldata args
        ) external payable returns (uint256 makingAmount, uint256 takingAmount, bytes32 orderHash);

        event OrderFilled(bytes32 orderHash, uint256 remainingAmount);
    }
}

/// Taker traits flag: `amount` is a making amount.
const MAKER_AMOUNT_FLAG: usize = 255;
/// Bit offset of the args extension length field (24 bits).
const ARGS_EXTENSION_LENGTH_OFFSET: usize = 224;
const ARGS_EXTENSION_LENGTH_MAX: usize = (1 << 24) - 1;
/// Width of the threshold field in the low bits of the taker traits.
const THRESHOLD_BITS: usize = 185;
/// secp256k1 group order divided by two; canonical signatures have `s <= N/2`.
const SECP256K1_HALF_ORDER: U256 =
    uint!(0x7FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF5D576E7357A4501DDFE92F46681B20A0_U256);

/// Borrowed view of a persisted order, as far as the protocol cares.
#[derive(Debug, Clone, Copy)]
pub struct OrderPayload<'a> {
    pub salt: U256,
    pub maker: Address,
    pub receiver: Option<Address>,
    pub maker_asset: Address,
    pub taker_asset: Address,
    pub making_amount: U256,
    pub taking_amount: U256,
    pub traits: &'a [u8],
    pub signature: &'a [u8],
    pub extension: &'a [u8],
}

/// Why an order could not be turned into a call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructionError {
    #[error("signature must be 64 or 65 bytes, got {0}")]
    SignatureLength(usize),
    #[error("signature recovery byte {0} is not 0, 1, 27 or 28")]
    SignatureRecoveryId(u8),
    #[error("signature s value is above half the curve order")]
    SignatureHighS,
    #[error("traits blob is {0} bytes, expected at most 32")]
    TraitsLength(usize),
    #[error("extension is {0} bytes, longer than the taker traits length field allows")]
    ExtensionTooLong(usize),
    #[error("{0} is the zero address")]
    ZeroAddress(&'static str),
    #[error("{0} is zero")]
    ZeroAmount(&'static str),
    #[error("taking amount does not fit the taker threshold field")]
    ThresholdOverflow,
}

/// A fully reconstructed `fillOrderArgs` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillCall {
    pub order: LimitOrder,
    pub r: B256,
    pub vs: B256,
    pub amount: U256,
    pub taker_traits: U256,
    pub args: Bytes,
}

impl FillCall {
    /// ABI-encoded calldata, selector included.
    pub fn calldata(&self) -> Bytes {
        ILimitOrderProtocol::fillOrderArgsCall {
            order: self.order.clone(),
            r: self.r,
            vs: self.vs,
            amount: self.amount,
            takerTraits: self.taker_traits,
            args: self.args.clone(),
        }
        .abi_encode()
        .into()
    }
}

/// Rebuild the protocol call for a persisted order.
///
/// Pure: no I/O, no clock. Fills the full making amount; the contract caps
/// it at whatever is still remaining for partially filled orders.
pub fn reconstruct(payload: &OrderPayload<'_>) -> Result<FillCall, ReconstructionError> {
    if payload.maker.is_zero() {
        return Err(ReconstructionError::ZeroAddress("maker"));
    }
    if payload.maker_asset.is_zero() {
        return Err(ReconstructionError::ZeroAddress("maker asset"));
    }
    if payload.taker_asset.is_zero() {
        return Err(ReconstructionError::ZeroAddress("taker asset"));
    }
    if payload.making_amount.is_zero() {
        return Err(ReconstructionError::ZeroAmount("making amount"));
    }
    if payload.taking_amount.is_zero() {
        return Err(ReconstructionError::ZeroAmount("taking amount"));
    }

    let maker_traits = traits_word(payload.traits)?;
    let (r, vs) = compact_signature(payload.signature)?;
    let taker_traits = taker_traits(payload.taking_amount, payload.extension.len())?;

    let order = LimitOrder {
        salt: payload.salt,
        maker: address_word(payload.maker),
        receiver: payload.receiver.map(address_word).unwrap_or(U256::ZERO),
        makerAsset: address_word(payload.maker_asset),
        takerAsset: address_word(payload.taker_asset),
        makingAmount: payload.making_amount,
        takingAmount: payload.taking_amount,
        makerTraits: maker_traits,
    };

    Ok(FillCall {
        order,
        r,
        vs,
        amount: payload.making_amount,
        taker_traits,
        args: Bytes::copy_from_slice(payload.extension),
    })
}

/// An `OrderFilled` event as found in a receipt, with the address that emitted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillEvent {
    pub emitter: Address,
    pub order_hash: B256,
    pub remaining: U256,
}

/// Every `OrderFilled`-shaped log in a receipt, in log order.
///
/// Nothing is trusted here; any contract can emit a log with this shape.
/// Use [`remaining_after_fill`] to pick the one that counts.
pub fn fill_events(logs: &[Log]) -> Vec<FillEvent> {
    logs.iter()
        .filter_map(|log| {
            let decoded = log.log_decode::<ILimitOrderProtocol::OrderFilled>().ok()?;
            Some(FillEvent {
                emitter: log.address(),
                order_hash: decoded.inner.data.orderHash,
                remaining: decoded.inner.data.remainingAmount,
            })
        })
        .collect()
}

/// Remaining making amount from the last fill event emitted by `contract`
/// for `order_hash`.
pub fn remaining_after_fill(fills: &[FillEvent], contract: Address, order_hash: B256) -> Option<U256> {
    fills
        .iter()
        .rev()
        .find(|fill| fill.emitter == contract && fill.order_hash == order_hash)
        .map(|fill| fill.remaining)
}

fn address_word(address: Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

fn traits_word(blob: &[u8]) -> Result<U256, ReconstructionError> {
    if blob.len() > 32 {
        return Err(ReconstructionError::TraitsLength(blob.len()));
    }
    Ok(U256::from_be_slice(blob))
}

/// Convert a 65-byte `(r, s, v)` signature to compact `(r, vs)` form.
/// 64-byte input is taken as already compact.
fn compact_signature(signature: &[u8]) -> Result<(B256, B256), ReconstructionError> {
    match signature.len() {
        64 => Ok((
            B256::from_slice(&signature[..32]),
            B256::from_slice(&signature[32..]),
        )),
        65 => {
            let r = B256::from_slice(&signature[..32]);
            let s = U256::from_be_slice(&signature[32..64]);
            if s > SECP256K1_HALF_ORDER {
                return Err(ReconstructionError::SignatureHighS);
            }
            let parity = match signature[64] {
                0 | 27 => false,
                1 | 28 => true,
                v => return Err(ReconstructionError::SignatureRecoveryId(v)),
            };
            let mut vs = s;
            vs.set_bit(255, parity);
            Ok((r, B256::from(vs.to_be_bytes::<32>())))
        }
        n => Err(ReconstructionError::SignatureLength(n)),
    }
}

fn taker_traits(threshold: U256, extension_len: usize) -> Result<U256, ReconstructionError> {
    if extension_len > ARGS_EXTENSION_LENGTH_MAX {
        return Err(ReconstructionError::ExtensionTooLong(extension_len));
    }
    if threshold.bit_len() > THRESHOLD_BITS {
        return Err(ReconstructionError::ThresholdOverflow);
    }

    let mut traits = threshold;
    traits |= U256::from(extension_len) << ARGS_EXTENSION_LENGTH_OFFSET;
    traits.set_bit(MAKER_AMOUNT_FLAG, true);
    Ok(traits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, LogData};
    use alloy::sol_types::SolEvent;

    const MAKER: Address = address!("00000000000000000000000000000000000000aa");
    const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");

    fn signature_65(v: u8) -> Vec<u8> {
        let mut sig = vec![0x11u8; 32];
        sig.extend_from_slice(&[0x22u8; 32]);
        sig.push(v);
        sig
    }

    fn payload<'a>(signature: &'a [u8], traits: &'a [u8], extension: &'a [u8]) -> OrderPayload<'a> {
        OrderPayload {
            salt: U256::from(42u64),
            maker: MAKER,
            receiver: None,
            maker_asset: USDC,
            taker_asset: WETH,
            making_amount: U256::from(100_000_000u64),
            taking_amount: U256::from(60_000_000_000_000_000u64),
            traits,
            signature,
            extension,
        }
    }

    #[test]
    fn test_reconstruct_field_order() {
        let sig = signature_65(27);
        let traits = [0x01u8, 0x02];
        let call = reconstruct(&payload(&sig, &traits, &[])).unwrap();

        assert_eq!(call.order.salt, U256::from(42u64));
        assert_eq!(call.order.maker, U256::from_be_slice(MAKER.as_slice()));
        assert_eq!(call.order.receiver, U256::ZERO);
        assert_eq!(call.order.makerAsset, U256::from_be_slice(USDC.as_slice()));
        assert_eq!(call.order.takerAsset, U256::from_be_slice(WETH.as_slice()));
        assert_eq!(call.order.makerTraits, U256::from(0x0102u64));
        assert_eq!(call.amount, call.order.makingAmount);
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_compact_signature_parity() {
        let (r, vs) = compact_signature(&signature_65(27)).unwrap();
        assert_eq!(r, B256::repeat_byte(0x11));
        assert_eq!(vs, B256::repeat_byte(0x22));

        let (_, vs) = compact_signature(&signature_65(28)).unwrap();
        assert_eq!(vs[0], 0x22 | 0x80);

        let (_, vs) = compact_signature(&signature_65(1)).unwrap();
        assert_eq!(vs[0], 0xa2);

        // Already-compact passes through untouched
        let compact = [0x33u8; 64];
        let (r, vs) = compact_signature(&compact).unwrap();
        assert_eq!(r, B256::repeat_byte(0x33));
        assert_eq!(vs, B256::repeat_byte(0x33));
    }

    #[test]
    fn test_malformed_signatures() {
        assert_eq!(
            compact_signature(&[0u8; 63]),
            Err(ReconstructionError::SignatureLength(63))
        );
        assert_eq!(
            compact_signature(&signature_65(5)),
            Err(ReconstructionError::SignatureRecoveryId(5))
        );

        let mut high_s = signature_65(27);
        high_s[32] = 0x80;
        assert_eq!(compact_signature(&high_s), Err(ReconstructionError::SignatureHighS));
    }

    #[test]
    fn test_rejects_bad_payloads() {
        let sig = signature_65(27);
        let long_traits = [0u8; 33];
        assert_eq!(
            reconstruct(&payload(&sig, &long_traits, &[])),
            Err(ReconstructionError::TraitsLength(33))
        );

        let mut zero_making = payload(&sig, &[], &[]);
        zero_making.making_amount = U256::ZERO;
        assert_eq!(
            reconstruct(&zero_making),
            Err(ReconstructionError::ZeroAmount("making amount"))
        );

        let mut zero_maker = payload(&sig, &[], &[]);
        zero_maker.maker = Address::ZERO;
        assert_eq!(
            reconstruct(&zero_maker),
            Err(ReconstructionError::ZeroAddress("maker"))
        );
    }

    #[test]
    fn test_taker_traits_layout() {
        let traits = taker_traits(U256::from(1000u64), 68).unwrap();
        assert!(traits.bit(MAKER_AMOUNT_FLAG));
        assert_eq!(
            (traits >> ARGS_EXTENSION_LENGTH_OFFSET) & U256::from(ARGS_EXTENSION_LENGTH_MAX),
            U256::from(68u64)
        );
        assert_eq!(traits & ((U256::from(1u64) << THRESHOLD_BITS) - U256::from(1u64)), U256::from(1000u64));

        assert_eq!(
            taker_traits(U256::MAX, 0),
            Err(ReconstructionError::ThresholdOverflow)
        );
    }

    #[test]
    fn test_extension_forwarded_verbatim() {
        let sig = signature_65(28);
        let extension = vec![0xde, 0xad, 0xbe, 0xef];
        let call = reconstruct(&payload(&sig, &[], &extension)).unwrap();
        assert_eq!(call.args.as_ref(), extension.as_slice());

        let calldata = call.calldata();
        assert_eq!(&calldata[..4], ILimitOrderProtocol::fillOrderArgsCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_high_s_boundary() {
        let mut sig = vec![0x11u8; 32];
        sig.extend_from_slice(&SECP256K1_HALF_ORDER.to_be_bytes::<32>());
        sig.push(27);
        assert!(compact_signature(&sig).is_ok());

        // Bit 255 clear but still above n/2
        let just_above = SECP256K1_HALF_ORDER + U256::from(1u64);
        sig[32..64].copy_from_slice(&just_above.to_be_bytes::<32>());
        assert_eq!(compact_signature(&sig), Err(ReconstructionError::SignatureHighS));
    }

    #[test]
    fn test_fill_events_only_trust_contract_and_order() {
        const CONTRACT: Address = address!("111111125421ca6dc452d289314280a0f8842a65");
        const SPOOFER: Address = address!("00000000000000000000000000000000000000ee");
        let order_hash = B256::repeat_byte(1);

        let to_log = |address: Address, data: LogData| Log {
            inner: alloy::primitives::Log { address, data },
            ..Default::default()
        };
        let filled = |hash: B256, remaining: u64| {
            ILimitOrderProtocol::OrderFilled {
                orderHash: hash,
                remainingAmount: U256::from(remaining),
            }
            .encode_log_data()
        };

        let logs = vec![
            to_log(CONTRACT, filled(order_hash, 500)),
            to_log(CONTRACT, LogData::new_unchecked(vec![B256::repeat_byte(9)], Bytes::new())),
            // Same shape from another contract, claiming a full fill
            to_log(SPOOFER, filled(order_hash, 0)),
            // Genuine event for a different order
            to_log(CONTRACT, filled(B256::repeat_byte(2), 0)),
        ];

        let fills = fill_events(&logs);
        assert_eq!(fills.len(), 3);
        assert_eq!(fills[1].emitter, SPOOFER);

        assert_eq!(remaining_after_fill(&fills, CONTRACT, order_hash), Some(U256::from(500u64)));
        assert_eq!(remaining_after_fill(&fills, SPOOFER, B256::repeat_byte(3)), None);
        assert_eq!(remaining_after_fill(&fill_events(&[]), CONTRACT, order_hash), None);
    }
}
