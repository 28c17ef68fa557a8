use alloc::format;

use super::base::{GridBase, GridType, GridView};
use crate::{
    RecipeError, RecipeResult,
    components::{MAX_TENSOR_DIMS, SizeArray, size_array},
    error::ensure,
};

/// Splits an axis that is not reduced: the output's fast dim, its spatial dim, or the filter
/// dims of the weights gradient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    base: GridBase,
    geo_at_first_conv_dim_nr: u32,
    creation: Option<(u32, u32)>,
}

impl Grid {
    /// A grid splitting `sizes` starting at `split_dim`.
    pub fn new(
        grid_type: GridType,
        bases: SizeArray,
        sizes: SizeArray,
        orig_sizes: SizeArray,
        split_dim: usize,
    ) -> RecipeResult<Self> {
        if split_dim >= MAX_TENSOR_DIMS {
            return Err(RecipeError::SplitDimOutOfRange {
                dim: split_dim,
                max: MAX_TENSOR_DIMS,
            });
        }

        Ok(Self {
            base: GridBase::new(grid_type, bases, sizes, orig_sizes, Some(split_dim)),
            geo_at_first_conv_dim_nr: 0,
            creation: None,
        })
    }

    /// A one dimensional grid over `[base, base + size)`.
    pub fn flat(grid_type: GridType, base: u32, size: u32, orig_size: u32) -> RecipeResult<Self> {
        if size == 0 {
            return Err(RecipeError::InvalidConfig(format!(
                "The {grid_type} grid cannot split an empty view"
            )));
        }

        Self::new(
            grid_type,
            size_array(base, 0),
            size_array(size, 1),
            size_array(orig_size, 1),
            0,
        )
    }

    /// Splits the view in steps of at most `step_capacity` geometries of `max_step_size`
    /// elements.
    ///
    /// Creating again with the same arguments is a no-op.
    pub fn create(&mut self, max_step_size: u32, step_capacity: u32) -> RecipeResult<()> {
        if let Some(creation) = self.creation {
            return match creation == (max_step_size, step_capacity) {
                true => Ok(()),
                false => Err(RecipeError::AlreadyCreated {
                    grid_type: self.base.grid_type,
                }),
            };
        }
        if step_capacity == 0 {
            return Err(RecipeError::ZeroStepCapacity {
                grid_type: self.base.grid_type,
            });
        }
        if max_step_size == 0 {
            return Err(RecipeError::InvalidConfig(format!(
                "The {} grid needs a non-zero step size",
                self.base.grid_type
            )));
        }

        match self.base.grid_type {
            GridType::Conv => self.create_for_conv(max_step_size, step_capacity)?,
            _ => self.create_for_default(max_step_size, step_capacity)?,
        }
        self.base.check_template()?;
        self.base.created = true;
        self.creation = Some((max_step_size, step_capacity));

        log::trace!(
            "Created {} grid: {} steps, template {:?}",
            self.base.grid_type,
            self.base.grid_size,
            self.base.template
        );

        Ok(())
    }

    /// Widens the grid to up to `new_size` steps, keeping atomic and partial unit lengths.
    ///
    /// The grid never grows past one atomic unit per step.
    pub fn extend(&mut self, new_size: u32) -> RecipeResult<()> {
        if !self.base.created {
            return Err(RecipeError::NotCreated {
                grid_type: self.base.grid_type,
            });
        }
        ensure(
            new_size > self.base.grid_size,
            "Extending a grid requires more steps",
        )?;
        let steps_nr = self.base.template.steps_nr();
        ensure(
            self.base.grid_size == steps_nr,
            "Only grids made of a single template can be extended",
        )?;

        let units_nr = self.base.template.units_nr();
        let new_steps_nr = new_size.min(units_nr);
        if new_steps_nr <= steps_nr {
            return Ok(());
        }

        let view_size = self.view_size();
        self.base
            .template
            .distribute_uniformly(new_steps_nr, view_size)?;
        ensure(
            self.base.template.units_nr() == units_nr,
            "Extension changed the number of units",
        )?;
        self.base.grid_size = self.base.template.steps_nr();

        log::trace!(
            "Extended {} grid to {} steps",
            self.base.grid_type,
            self.base.grid_size
        );

        Ok(())
    }

    /// Number of geometries covering the first convolution dim.
    pub fn geo_at_first_conv_dim_nr(&self) -> u32 {
        self.geo_at_first_conv_dim_nr
    }

    fn create_for_default(&mut self, max_step_size: u32, step_capacity: u32) -> RecipeResult<()> {
        let view_size = self.base.calc_view_size(false, 0..MAX_TENSOR_DIMS);
        let step_len = max_step_size as u64 * step_capacity as u64;
        let grid_size = (view_size as u64).div_ceil(step_len) as u32;

        self.base.template.atomic_unit_length = max_step_size;
        self.base
            .template
            .distribute_uniformly(grid_size, view_size)?;
        self.base.template.partial_unit_length = view_size % max_step_size;
        self.base.grid_size = grid_size;

        Ok(())
    }

    // Filters are never crossed: the grid repeats one template per filter.
    fn create_for_conv(&mut self, geo_size: u32, step_capacity: u32) -> RecipeResult<()> {
        let mut split_dim = self.base.split_dim.unwrap_or(1);
        let sizes = self.base.sizes;
        let view_size = self.base.calc_view_size(false, 0..MAX_TENSOR_DIMS);
        let first_conv_dim_len = sizes[split_dim];
        ensure(first_conv_dim_len != 0, "Convolution grid has an empty first dim")?;
        let filters_nr = view_size / first_conv_dim_len;
        ensure(filters_nr != 0, "Expected at least one filter")?;

        let geo_at_first = first_conv_dim_len.div_ceil(geo_size);
        self.geo_at_first_conv_dim_nr = geo_at_first;
        let template = &mut self.base.template;

        if geo_at_first * filters_nr == 1 {
            template.atomic_unit_length = first_conv_dim_len;
            template.units_nr_per_first_step = 1;
            template.first_steps_nr = 1;
            self.base.grid_size = 1;
            return Ok(());
        }

        template.units_nr_per_first_step = geo_at_first.min(step_capacity);
        let mut total_units = template.units_nr_per_first_step;
        for (dim, size) in sizes.iter().enumerate().skip(2) {
            // Higher dims take the lower ones whole.
            let dim_limit = step_capacity / total_units;
            if dim_limit <= 1 {
                break;
            }
            template.units_nr_per_first_step = (*size).min(dim_limit);
            split_dim = dim;
            total_units *= template.units_nr_per_first_step;
        }
        ensure(
            template.units_nr_per_first_step != 0 && total_units <= step_capacity,
            "Convolution units exceed the step capacity",
        )?;

        let grid_size = if split_dim == 1 {
            template.atomic_unit_length = geo_size;
            template.first_steps_nr = geo_at_first / template.units_nr_per_first_step;
            template.units_nr_per_last_step = geo_at_first % template.units_nr_per_first_step;
            template.last_steps_nr = u32::from(template.units_nr_per_last_step != 0);
            template.partial_unit_length = first_conv_dim_len % geo_size;
            filters_nr * template.steps_nr()
        } else {
            template.atomic_unit_length = 1;
            template.first_steps_nr = sizes[split_dim] / template.units_nr_per_first_step;
            template.units_nr_per_last_step = sizes[split_dim] % template.units_nr_per_first_step;
            template.last_steps_nr = u32::from(template.units_nr_per_last_step != 0);
            let repeats: u32 = sizes[split_dim + 1..]
                .iter()
                .filter(|size| **size != 0)
                .product();
            repeats * template.steps_nr()
        };
        ensure(
            template.first_steps_nr != 0 && grid_size != 0,
            "Convolution grid is empty",
        )?;
        template.balance()?;

        self.base.split_dim = Some(split_dim);
        self.base.grid_size = grid_size;

        Ok(())
    }
}

impl GridView for Grid {
    fn base(&self) -> &GridBase {
        &self.base
    }

    fn is_partial_step(&self, idx_in_template: u32) -> bool {
        match self.base.grid_type {
            GridType::Conv => {
                self.geo_at_first_conv_dim_nr != 0
                    && idx_in_template % self.geo_at_first_conv_dim_nr == 0
            }
            _ => idx_in_template + 1 == self.base.template.steps_nr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn steps(grid: &Grid) -> alloc::vec::Vec<u32> {
        (0..grid.grid_size()).map(|i| grid.step_size(i)).collect()
    }

    #[test]
    fn remainder_goes_to_first_steps() {
        let mut grid = Grid::flat(GridType::Sp, 0, 1000, 1000).unwrap();
        grid.create(1, 334).unwrap();

        assert_eq!(grid.grid_size(), 3);
        assert_eq!(steps(&grid), [334, 333, 333]);
    }

    #[test]
    fn capacity_bounds_every_step() {
        let mut grid = Grid::flat(GridType::Sp, 0, 1000, 1000).unwrap();
        grid.create(1, 333).unwrap();

        assert_eq!(steps(&grid), [250, 250, 250, 250]);
    }

    #[test]
    fn single_geometry_is_not_split() {
        let mut grid = Grid::flat(GridType::Fcd, 0, 256, 256).unwrap();
        grid.create(256, 4).unwrap();

        assert_eq!(grid.grid_size(), 1);
        assert!(!grid.is_multi_step());
        assert_eq!(grid.step_size(0), 256);
    }

    #[test]
    fn padded_view_reports_valid_extent() {
        let mut grid = Grid::flat(GridType::Fcd, 0, 1024, 1000).unwrap();
        grid.create(256, 1).unwrap();

        assert_eq!(steps(&grid), [256, 256, 256, 256]);
        assert_eq!(grid.valid_step_size(0), 256);
        assert_eq!(grid.valid_step_size(3), 232);
        assert_eq!(grid.valid_partial_unit_length(), 232);
    }

    #[test]
    fn misaligned_view_shrinks_the_last_step() {
        let mut grid = Grid::flat(GridType::Fcd, 0, 1000, 1000).unwrap();
        grid.create(128, 2).unwrap();

        let sizes = steps(&grid);
        assert_eq!(sizes, [256, 256, 256, 232]);
        assert_eq!(sizes.iter().sum::<u32>(), 1000);
    }

    #[rstest]
    #[case(1000, 1, 333)]
    #[case(1000, 128, 3)]
    #[case(77, 16, 1)]
    #[case(4096, 64, 7)]
    #[case(5, 1, 1)]
    #[case(513, 256, 2)]
    fn steps_cover_the_view_exactly(
        #[case] view: u32,
        #[case] geo: u32,
        #[case] capacity: u32,
    ) {
        let mut grid = Grid::flat(GridType::Sp, 0, view, view).unwrap();
        grid.create(geo, capacity).unwrap();

        let sizes = steps(&grid);
        assert_eq!(sizes.iter().sum::<u32>(), view);
        assert!(sizes.iter().all(|size| *size <= geo * capacity));

        let units: alloc::vec::Vec<u32> = sizes.iter().map(|size| size.div_ceil(geo)).collect();
        let max = units.iter().max().unwrap();
        let min = units.iter().min().unwrap();
        assert!(max - min <= 1);
        for (i, size) in sizes.iter().enumerate() {
            assert_eq!(grid.step_offset(i as u32), sizes[..i].iter().sum::<u32>());
            assert!(*size > 0);
        }
    }

    #[test]
    fn create_is_idempotent() {
        let mut first = Grid::flat(GridType::Sp, 0, 900, 900).unwrap();
        let mut second = first.clone();
        first.create(64, 3).unwrap();
        second.create(64, 3).unwrap();
        second.create(64, 3).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            second.create(64, 4),
            Err(RecipeError::AlreadyCreated {
                grid_type: GridType::Sp
            })
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut grid = Grid::flat(GridType::Fcd, 0, 10, 10).unwrap();
        assert_eq!(
            grid.create(8, 0),
            Err(RecipeError::ZeroStepCapacity {
                grid_type: GridType::Fcd
            })
        );
    }

    #[test]
    fn split_dim_out_of_range_is_rejected() {
        let err = Grid::new(GridType::Conv, [0; 5], [1; 5], [1; 5], 5).unwrap_err();
        assert_eq!(err, RecipeError::SplitDimOutOfRange { dim: 5, max: 5 });
    }

    #[test]
    fn extend_adds_steps_up_to_one_unit_each() {
        let mut grid = Grid::flat(GridType::Sp, 0, 1000, 1000).unwrap();
        grid.create(128, 8).unwrap();
        assert_eq!(grid.grid_size(), 1);

        grid.extend(3).unwrap();
        assert_eq!(steps(&grid), [384, 384, 232]);

        grid.extend(20).unwrap();
        assert_eq!(grid.grid_size(), 8);
        assert_eq!(steps(&grid).iter().sum::<u32>(), 1000);
    }

    #[test]
    fn conv_grid_walks_filters_whole() {
        // C view of a weights gradient: K cleared, C = 300, 2 x 3 filter.
        let sizes = [0, 300, 2, 3, 1];
        let mut grid = Grid::new(GridType::Conv, [0; 5], sizes, sizes, 1).unwrap();
        grid.create(128, 1).unwrap();

        assert_eq!(grid.geo_at_first_conv_dim_nr(), 3);
        assert_eq!(grid.split_dim(), Some(1));
        assert_eq!(grid.grid_size(), 18);
        // The misaligned geometry leads every filter.
        assert_eq!(&steps(&grid)[..3], [44, 128, 128]);
        assert_eq!(steps(&grid).iter().sum::<u32>(), grid.view_size());
    }

    #[test]
    fn conv_grid_packs_filters_when_capacity_allows() {
        let sizes = [0, 100, 3, 3, 1];
        let mut grid = Grid::new(GridType::Conv, [0; 5], sizes, sizes, 1).unwrap();
        grid.create(128, 6).unwrap();

        // One geometry covers C, then 3 filter columns fit, then 2 rows.
        assert_eq!(grid.split_dim(), Some(3));
        assert_eq!(grid.grid_size(), 2);
        assert_eq!(steps(&grid), [2, 1]);
    }
}
