///! Quake 1 map format support

use std::collections::HashMap;

use thiserror::Error;

use crate::math::Vec3d;

/// Q1 .map brush face
#[derive(Clone, Debug, PartialEq)]
pub struct MapBrushFace {
    /// First plane point
    pub p0: Vec3d,

    /// Second plane point
    pub p1: Vec3d,

    /// Third plane point
    pub p2: Vec3d,

    /// Face texture name
    pub texture_name: String,

    /// Texture offset by X (in texels)
    pub texture_offset_x: f64,

    /// Texture offset by Y (in texels)
    pub texture_offset_y: f64,

    /// Texture rotation (in degrees)
    pub texture_rotation: f64,

    pub texture_scale_x: f64,
    pub texture_scale_y: f64,
}

/// Map brush
#[derive(Clone, Debug, PartialEq)]
pub struct MapBrush {
    /// Face set
    pub faces: Vec<MapBrushFace>,
}

/// Map entity (brush and string-string property collection)
#[derive(Clone, Debug, PartialEq)]
pub struct MapEntity {
    /// Entity properties
    pub properties: HashMap<String, String>,

    /// Entity brush set
    pub brushes: Vec<MapBrush>,
}

/// Map (entity collection, actually)
#[derive(Clone, Debug, PartialEq)]
pub struct Map {
    /// All map entities
    pub entities: Vec<MapEntity>,
}

/// Q1 map parsing error
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MapParseError {
    /// Expected one more token
    #[error("unexpected end of map")]
    NextTokenExpected,

    /// Floating-point number parsing error
    #[error("invalid number \"{token}\": {error}")]
    FloatParsingError {
        /// Token floating point number parsed from
        token: String,

        /// Exact error occured during parsing process
        error: std::num::ParseFloatError,
    },

    /// Invalid property tokens
    #[error("invalid property {key} {value}")]
    InvalidProperty {
        key: String,
        value: String,
    },

    /// Unexpected token
    #[error("expected \"{expected}\", found \"{actual}\"")]
    UnexpectedToken {
        actual: String,
        expected: &'static str,
    },
}

/// Token list tail
type Tokens<'l, 't> = &'l [&'t str];

/// Split next token from string start, None at the end of the string
fn parse_token(mut rest: &str) -> Option<(&str, &str)> {
    loop {
        rest = rest.trim_start();

        match rest.strip_prefix("//") {
            Some(comment) => rest = comment.split_once('\n').map(|(_, tail)| tail).unwrap_or(""),
            None => break,
        }
    }

    if rest.is_empty() {
        return None;
    }

    // quoted token keeps its quotes, unterminated one takes the rest
    if let Some(quoted) = rest.strip_prefix('"') {
        return Some(match quoted.find('"') {
            Some(end) => (&rest[..end + 2], &rest[end + 2..]),
            None => (rest, ""),
        });
    }

    Some(rest.split_once(char::is_whitespace).unwrap_or((rest, "")))
}

/// Parse **any** next token
fn parse_next_token<'l, 't>(tl: Tokens<'l, 't>) -> Result<(&'t str, Tokens<'l, 't>), MapParseError> {
    tl.split_first()
        .map(|(tok, rest)| (*tok, rest))
        .ok_or(MapParseError::NextTokenExpected)
}

fn parse_literal<'l, 't>(tl: Tokens<'l, 't>, lit: &'static str) -> Result<Tokens<'l, 't>, MapParseError> {
    let (tok, tl) = parse_next_token(tl)?;

    if tok == lit {
        Ok(tl)
    } else {
        Err(MapParseError::UnexpectedToken { actual: tok.to_string(), expected: lit })
    }
}

fn parse_float<'l, 't>(tl: Tokens<'l, 't>) -> Result<(f64, Tokens<'l, 't>), MapParseError> {
    let (token, tl) = parse_next_token(tl)?;

    let val = token
        .parse::<f64>()
        .map_err(|error| MapParseError::FloatParsingError { token: token.to_string(), error })?;

    Ok((val, tl))
}

fn parse_vector<'l, 't>(tl: Tokens<'l, 't>) -> Result<(Vec3d, Tokens<'l, 't>), MapParseError> {
    let tl = parse_literal(tl, "(")?;
    let (x, tl) = parse_float(tl)?;
    let (y, tl) = parse_float(tl)?;
    let (z, tl) = parse_float(tl)?;
    let tl = parse_literal(tl, ")")?;

    Ok((Vec3d::new(x, y, z), tl))
}

fn parse_brush_face<'l, 't>(mut tl: Tokens<'l, 't>) -> Result<(MapBrushFace, Tokens<'l, 't>), MapParseError> {
    let p0;
    let p1;
    let p2;
    let texture_name;
    let texture_offset_x;
    let texture_offset_y;
    let texture_rotation;
    let texture_scale_x;
    let texture_scale_y;

    (p0, tl) = parse_vector(tl)?;
    (p1, tl) = parse_vector(tl)?;
    (p2, tl) = parse_vector(tl)?;

    (texture_name, tl) = parse_next_token(tl)?;

    (texture_offset_x, tl) = parse_float(tl)?;
    (texture_offset_y, tl) = parse_float(tl)?;
    (texture_rotation, tl) = parse_float(tl)?;
    (texture_scale_x, tl) = parse_float(tl)?;
    (texture_scale_y, tl) = parse_float(tl)?;

    Ok((
        MapBrushFace {
            p0,
            p1,
            p2,
            texture_name: texture_name.to_string(),
            texture_offset_x,
            texture_offset_y,
            texture_rotation,
            texture_scale_x,
            texture_scale_y,
        },
        tl,
    ))
}

fn parse_brush<'l, 't>(tl: Tokens<'l, 't>) -> Result<(MapBrush, Tokens<'l, 't>), MapParseError> {
    let mut tl = parse_literal(tl, "{")?;
    let mut faces = Vec::new();

    while tl.first() == Some(&"(") {
        let (face, next_tl) = parse_brush_face(tl)?;
        tl = next_tl;
        faces.push(face);
    }

    let tl = parse_literal(tl, "}")?;

    Ok((MapBrush { faces }, tl))
}

fn parse_property<'l, 't>(tl: Tokens<'l, 't>) -> Result<((String, String), Tokens<'l, 't>), MapParseError> {
    let (key, tl) = parse_next_token(tl)?;
    let (value, tl) = parse_next_token(tl)?;

    let is_quoted = |s: &str| s.len() >= 2 && s.starts_with('"') && s.ends_with('"');

    if is_quoted(key) && is_quoted(value) {
        Ok(((key[1..key.len() - 1].to_string(), value[1..value.len() - 1].to_string()), tl))
    } else {
        Err(MapParseError::InvalidProperty { key: key.to_string(), value: value.to_string() })
    }
}

impl Map {
    /// Parse map from string
    pub fn parse(text: &str) -> Result<Map, MapParseError> {
        let tokens = {
            let mut rest = text;
            let mut tok_list = Vec::new();

            while let Some((tok, new_rest)) = parse_token(rest) {
                tok_list.push(tok);
                rest = new_rest;
            }

            tok_list
        };

        let mut entities = Vec::<MapEntity>::new();
        let mut tl = tokens.as_slice();

        while !tl.is_empty() {
            tl = parse_literal(tl, "{")?;

            let mut properties = HashMap::<String, String>::new();
            let mut brushes = Vec::<MapBrush>::new();

            'entity_contents: loop {
                match tl.first() {
                    Some(&"{") => {
                        let (brush, next_tl) = parse_brush(tl)?;
                        tl = next_tl;
                        brushes.push(brush);
                    }
                    Some(tok) if tok.starts_with('"') => {
                        let ((key, value), next_tl) = parse_property(tl)?;
                        tl = next_tl;
                        _ = properties.insert(key, value);
                    }
                    _ => break 'entity_contents,
                }
            }

            tl = parse_literal(tl, "}")?;

            entities.push(MapEntity { brushes, properties });
        }

        Ok(Map { entities })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"
// Game: Quake
{
"classname" "worldspawn"
"wad" "gfx/base.wad"
{
( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) city4_2 0 0 0 1 1
( -64 -64 -16 ) ( -64 -64 -15 ) ( -63 -64 -16 ) city4_2 0 0 0 1 1
( -64 -64 -16 ) ( -63 -64 -16 ) ( -64 -63 -16 ) *04water 16 -8 45 0.5 0.5
( 64 64 16 ) ( 64 65 16 ) ( 65 64 16 ) city4_2 0 0 0 1 1
( 64 64 16 ) ( 65 64 16 ) ( 64 64 17 ) city4_2 0 0 0 1 1
( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) city4_2 0 0 0 1 1
}
}
{
"classname" "info_player_start"
"origin" "0 0 40"
}
"#;

    #[test]
    fn parse_entities_and_brushes() {
        let map = Map::parse(MAP).unwrap();

        assert_eq!(map.entities.len(), 2);
        assert_eq!(map.entities[0].properties["wad"], "gfx/base.wad");
        assert_eq!(map.entities[0].brushes.len(), 1);
        assert_eq!(map.entities[1].properties["origin"], "0 0 40");

        let face = &map.entities[0].brushes[0].faces[2];
        assert_eq!(face.texture_name, "*04water");
        assert_eq!(face.p1, Vec3d::new(-63.0, -64.0, -16.0));
        assert_eq!(face.texture_rotation, 45.0);
        assert_eq!(face.texture_scale_y, 0.5);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Map::parse("{ \"classname\" \"worldspawn\""), Err(MapParseError::NextTokenExpected));
        assert!(matches!(
            Map::parse("{ { ( 0 0 x ) } }"),
            Err(MapParseError::FloatParsingError { .. })
        ));
        assert_eq!(
            Map::parse("{ \"classname\" worldspawn }"),
            Err(MapParseError::InvalidProperty { key: "\"classname\"".into(), value: "worldspawn".into() })
        );
        assert_eq!(
            Map::parse("}"),
            Err(MapParseError::UnexpectedToken { actual: "}".into(), expected: "{" })
        );
    }
}
