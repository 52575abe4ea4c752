//! Joins object modules into one flat image.
//!
//! Labels carry absolute addresses from assembly, so modules are placed
//! back to back without relocation. Linking only fills in what the
//! assembler left open: address placeholders and data expressions.

use std::collections::BTreeMap;

use vm64_core::isa::{evaluate_with, ExpressionError};

use crate::errors::{LinkError, LinkErrorKind};
use crate::object::{encode_address, ObjectModule, ADDRESS_PLACEHOLDER};

/// Result of a successful link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedImage {
    /// Flat image bytes.
    pub bytes: Vec<u8>,
    /// Every defined symbol and its address.
    pub symbols: BTreeMap<String, u64>,
}

/// Links `objects` in order.
///
/// # Errors
///
/// Returns a [`LinkError`] for duplicate or undefined symbols, a
/// referencing block without exactly one placeholder, or a data expression
/// that does not evaluate.
pub fn link(mut objects: Vec<ObjectModule>) -> Result<LinkedImage, LinkError> {
    let symbols = symbol_table(&objects)?;
    for object in &mut objects {
        patch_references(object, &symbols)?;
        fill_data(object, &symbols)?;
    }
    let bytes: Vec<u8> = objects.iter().flat_map(ObjectModule::flatten).collect();
    log::debug!(
        "linked {} module(s): {} bytes, {} symbol(s)",
        objects.len(),
        bytes.len(),
        symbols.len()
    );
    Ok(LinkedImage { bytes, symbols })
}

fn symbol_table(objects: &[ObjectModule]) -> Result<BTreeMap<String, u64>, LinkError> {
    let mut table = BTreeMap::new();
    for object in objects {
        for symbol in object.symbols.iter().filter(|symbol| symbol.defined) {
            if table.insert(symbol.name.clone(), symbol.address).is_some() {
                return Err(LinkError::in_module(
                    LinkErrorKind::DuplicateSymbol(symbol.name.clone()),
                    &object.name,
                ));
            }
        }
    }
    Ok(table)
}

fn patch_references(
    object: &mut ObjectModule,
    symbols: &BTreeMap<String, u64>,
) -> Result<(), LinkError> {
    let module = object.name.clone();
    for symbol in &object.symbols {
        if symbol.references.is_empty() {
            continue;
        }
        let address = *symbols.get(&symbol.name).ok_or_else(|| {
            LinkError::in_module(LinkErrorKind::UndefinedSymbol(symbol.name.clone()), &module)
        })?;
        for &block in &symbol.references {
            let code = object.code.get_mut(block).ok_or_else(|| {
                LinkError::in_module(LinkErrorKind::MissingBlock(block), &module)
            })?;
            let sites = placeholder_sites(code);
            let [site] = sites.as_slice() else {
                return Err(LinkError::in_module(
                    LinkErrorKind::AmbiguousPatchSite {
                        symbol: symbol.name.clone(),
                        block,
                        found: sites.len(),
                    },
                    &module,
                ));
            };
            code[*site..*site + ADDRESS_PLACEHOLDER.len()]
                .copy_from_slice(&encode_address(address));
        }
    }
    Ok(())
}

/// Non-overlapping offsets of the placeholder in `code`.
fn placeholder_sites(code: &[u8]) -> Vec<usize> {
    let mut sites = Vec::new();
    let mut offset = 0;
    while offset + ADDRESS_PLACEHOLDER.len() <= code.len() {
        if code[offset..].starts_with(&ADDRESS_PLACEHOLDER) {
            sites.push(offset);
            offset += ADDRESS_PLACEHOLDER.len();
        } else {
            offset += 1;
        }
    }
    sites
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn fill_data(object: &mut ObjectModule, symbols: &BTreeMap<String, u64>) -> Result<(), LinkError> {
    for data in &object.data_expressions {
        let value = evaluate_with(&data.expression, |name| {
            symbols.get(name).map(|&address| address as i64)
        })
        .map_err(|source| {
            let kind = match source {
                ExpressionError::UnknownSymbol(name) => LinkErrorKind::UndefinedSymbol(name),
                source => LinkErrorKind::Expression {
                    expression: data.expression.clone(),
                    source,
                },
            };
            LinkError::in_module(kind, &object.name)
        })?;
        let width = data.width.bytes() as usize;
        let bytes = ((value as u64) & data.width.mask()).to_le_bytes();
        let block = object.code.get_mut(data.block).ok_or_else(|| {
            LinkError::in_module(LinkErrorKind::MissingBlock(data.block), &object.name)
        })?;
        *block = bytes[..width].to_vec();
    }
    Ok(())
}
