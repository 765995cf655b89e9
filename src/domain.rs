use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PortalError;

/// Entity kinds that can be placed in a download cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Investigation,
    Dataset,
    Datafile,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Investigation => "investigation",
            EntityType::Dataset => "dataset",
            EntityType::Datafile => "datafile",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "investigation" => Ok(EntityType::Investigation),
            "dataset" => Ok(EntityType::Dataset),
            "datafile" => Ok(EntityType::Datafile),
            _ => Err(PortalError::InvalidEntityType(value.to_string())),
        }
    }
}

/// Levels of the catalog hierarchy a view can browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum CatalogEntity {
    Facility,
    Instrument,
    FacilityCycle,
    Investigation,
    Dataset,
    Datafile,
}

impl CatalogEntity {
    /// Collection path segment on the catalog read endpoint.
    pub fn collection_path(&self) -> &'static str {
        match self {
            CatalogEntity::Facility => "facilities",
            CatalogEntity::Instrument => "instruments",
            CatalogEntity::FacilityCycle => "facilitycycles",
            CatalogEntity::Investigation => "investigations",
            CatalogEntity::Dataset => "datasets",
            CatalogEntity::Datafile => "datafiles",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogEntity::Facility => "facility",
            CatalogEntity::Instrument => "instrument",
            CatalogEntity::FacilityCycle => "facilityCycle",
            CatalogEntity::Investigation => "investigation",
            CatalogEntity::Dataset => "dataset",
            CatalogEntity::Datafile => "datafile",
        }
    }
}

impl From<EntityType> for CatalogEntity {
    fn from(value: EntityType) -> Self {
        match value {
            EntityType::Investigation => CatalogEntity::Investigation,
            EntityType::Dataset => CatalogEntity::Dataset,
            EntityType::Datafile => CatalogEntity::Datafile,
        }
    }
}

impl fmt::Display for CatalogEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Next state of a column header click: absent -> asc -> desc -> absent.
    pub fn cycle(current: Option<Direction>) -> Option<Direction> {
        match current {
            None => Some(Direction::Asc),
            Some(Direction::Asc) => Some(Direction::Desc),
            Some(Direction::Desc) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            _ => Err(PortalError::InvalidDirection(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Table,
    Card,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Table => "table",
            ViewMode::Card => "card",
        }
    }
}

impl FromStr for ViewMode {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(ViewMode::Table),
            "card" => Ok(ViewMode::Card),
            _ => Err(PortalError::InvalidView(value.to_string())),
        }
    }
}

pub const PAGE_SIZE_OPTIONS: [u32; 3] = [10, 20, 30];

/// Rows per page, restricted to [`PAGE_SIZE_OPTIONS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PageSize(u32);

impl PageSize {
    pub const DEFAULT: PageSize = PageSize(10);

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for PageSize {
    type Error = PortalError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if PAGE_SIZE_OPTIONS.contains(&value) {
            Ok(PageSize(value))
        } else {
            Err(PortalError::InvalidPageSize(value.to_string()))
        }
    }
}

impl From<PageSize> for u32 {
    fn from(value: PageSize) -> Self {
        value.0
    }
}

impl FromStr for PageSize {
    type Err = PortalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<u32>()
            .map_err(|_| PortalError::InvalidPageSize(value.to_string()))?;
        PageSize::try_from(parsed)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
