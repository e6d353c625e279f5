/// This module turns constructor arguments recorded as JSON into ABI encoded
/// bytes, guided by the constructor's parameter types.
use ethers::{
    abi::{self, Abi, ParamType, Token},
    types::{Address, Bytes, I256, U256},
    utils::hex,
};
use serde_json::Value;

use crate::errors::DeployError;

/// ABI encodes `args` against the constructor of `abi`. Contracts without a
/// constructor only accept an empty argument list.
pub fn encode_constructor_args(
    contract: &str,
    abi: &Abi,
    args: &[Value],
) -> Result<Bytes, DeployError> {
    let error = |reason: String| DeployError::ConstructorArgs {
        contract: contract.to_string(),
        reason,
    };

    let kinds = match abi.constructor() {
        Some(constructor) => constructor
            .inputs
            .iter()
            .map(|param| param.kind.clone())
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };
    if kinds.len() != args.len() {
        return Err(error(format!(
            "expected {} arguments, got {}",
            kinds.len(),
            args.len()
        )));
    }

    let tokens = kinds
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (kind, value))| {
            tokenize(kind, value).map_err(|reason| error(format!("argument {}: {}", i, reason)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(abi::encode(&tokens).into())
}

/// Appends the encoded constructor arguments to the creation bytecode.
pub fn creation_code(bytecode: &Bytes, encoded_args: &Bytes) -> Bytes {
    let mut code = bytecode.to_vec();
    code.extend_from_slice(encoded_args);
    code.into()
}

fn tokenize(kind: &ParamType, value: &Value) -> Result<Token, String> {
    match kind {
        ParamType::Address => Ok(Token::Address(
            expect_str(value)?
                .parse::<Address>()
                .map_err(|e| format!("invalid address {}: {}", value, e))?,
        )),
        ParamType::Uint(bits) => {
            let uint = parse_uint(value)?;
            if *bits < 256 && uint.bits() > *bits {
                return Err(format!("{} does not fit in uint{}", value, bits));
            }
            Ok(Token::Uint(uint))
        }
        ParamType::Int(bits) => {
            let int = parse_int(value)?;
            if *bits < 256 {
                // Two's complement: -2^(bits-1) ..= 2^(bits-1) - 1.
                let limit = U256::one() << (*bits - 1);
                let magnitude = int.unsigned_abs();
                let fits = if int.is_negative() {
                    magnitude <= limit
                } else {
                    magnitude < limit
                };
                if !fits {
                    return Err(format!("{} does not fit in int{}", value, bits));
                }
            }
            Ok(Token::Int(int.into_raw()))
        }
        ParamType::Bool => match value {
            Value::Bool(b) => Ok(Token::Bool(*b)),
            Value::String(s) if s == "true" || s == "false" => Ok(Token::Bool(s == "true")),
            _ => Err(format!("expected a bool, got {}", value)),
        },
        ParamType::String => Ok(Token::String(expect_str(value)?.to_string())),
        ParamType::Bytes => Ok(Token::Bytes(parse_hex(value)?)),
        ParamType::FixedBytes(size) => {
            let bytes = parse_hex(value)?;
            if bytes.len() != *size {
                return Err(format!("expected {} bytes, got {}", size, bytes.len()));
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Array(inner) => Ok(Token::Array(
            expect_array(value)?
                .iter()
                .map(|v| tokenize(inner, v))
                .collect::<Result<_, _>>()?,
        )),
        ParamType::FixedArray(inner, size) => {
            let values = expect_array(value)?;
            if values.len() != *size {
                return Err(format!("expected {} elements, got {}", size, values.len()));
            }
            Ok(Token::FixedArray(
                values
                    .iter()
                    .map(|v| tokenize(inner, v))
                    .collect::<Result<_, _>>()?,
            ))
        }
        ParamType::Tuple(kinds) => {
            let values = expect_array(value)?;
            if values.len() != kinds.len() {
                return Err(format!(
                    "expected a tuple of {}, got {}",
                    kinds.len(),
                    values.len()
                ));
            }
            Ok(Token::Tuple(
                kinds
                    .iter()
                    .zip(values)
                    .map(|(k, v)| tokenize(k, v))
                    .collect::<Result<_, _>>()?,
            ))
        }
    }
}

fn expect_str(value: &Value) -> Result<&str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("expected a string, got {}", value))
}

fn expect_array(value: &Value) -> Result<&Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("expected an array, got {}", value))
}

fn parse_hex(value: &Value) -> Result<Vec<u8>, String> {
    let s = expect_str(value)?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| format!("invalid hex {}: {}", value, e))
}

// Large integers have to be passed as strings since JSON numbers lose
// precision past 2^53.
fn parse_uint(value: &Value) -> Result<U256, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("expected an unsigned integer, got {}", n)),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(digits) => U256::from_str_radix(digits, 16).map_err(|e| e.to_string()),
            None => U256::from_dec_str(s).map_err(|e| e.to_string()),
        },
        _ => Err(format!("expected an unsigned integer, got {}", value)),
    }
}

fn parse_int(value: &Value) -> Result<I256, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(I256::from)
            .ok_or_else(|| format!("expected an integer, got {}", n)),
        Value::String(s) => I256::from_dec_str(s).map_err(|e| e.to_string()),
        _ => Err(format!("expected an integer, got {}", value)),
    }
}
